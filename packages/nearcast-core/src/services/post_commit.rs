//! Side effects deferred until a state change has committed.
//!
//! A mutation builds a [`PostCommit`] queue alongside its draft state. The
//! store runs the queue with the committed outcome only after the journal
//! write succeeds; on any failure the queue is dropped and nothing runs.

use futures::future::BoxFuture;

type Action<T> = Box<dyn FnOnce(T) -> BoxFuture<'static, ()> + Send>;

/// Ordered list of async actions that receive the committed outcome.
pub struct PostCommit<T> {
    actions: Vec<Action<T>>,
}

impl<T: Clone + Send + 'static> PostCommit<T> {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Appends an action.
    #[must_use]
    pub fn then<F>(mut self, action: F) -> Self
    where
        F: FnOnce(T) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.actions.push(Box::new(action));
        self
    }

    /// Runs every action in order, each to completion before the next.
    pub async fn run(self, outcome: T) {
        for action in self.actions {
            action(outcome.clone()).await;
        }
    }
}

impl<T: Clone + Send + 'static> Default for PostCommit<T> {
    fn default() -> Self {
        Self::new()
    }
}
