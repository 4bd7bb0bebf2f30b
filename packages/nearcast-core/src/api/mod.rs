//! HTTP/SSE API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{NearcastError, NearcastResult};
use crate::services::broadcast_service::BroadcastService;
use crate::services::connection_registry::ConnectionRegistry;
use crate::state::Config;

pub mod auth;
pub mod http;
pub mod response;
pub mod sse;

pub use auth::{AuthUser, Authenticator, HeaderAuthenticator};

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast operations and read models.
    pub service: Arc<BroadcastService>,
    /// Live push channels, one per user.
    pub registry: Arc<ConnectionRegistry>,
    /// Resolves the caller of each request.
    pub authenticator: Arc<dyn Authenticator>,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    service: Option<Arc<BroadcastService>>,
    registry: Option<Arc<ConnectionRegistry>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: Arc<BroadcastService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the authenticator. Defaults to [`HeaderAuthenticator`].
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// `Configuration` if a required service is missing.
    pub fn build(self) -> NearcastResult<AppState> {
        let missing = |name: &str| NearcastError::Configuration(format!("{} is required", name));
        Ok(AppState {
            service: self.service.ok_or_else(|| missing("service"))?,
            registry: self.registry.ok_or_else(|| missing("registry"))?,
            authenticator: self
                .authenticator
                .unwrap_or_else(|| Arc::new(HeaderAuthenticator)),
            config: self.config.unwrap_or_default(),
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Binds the configured port, or an OS-assigned one when it is 0.
pub async fn bind(config: &Config) -> Result<tokio::net::TcpListener, ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.preferred_port));
    Ok(tokio::net::TcpListener::bind(addr).await?)
}

/// Serves the API on `listener` until `shutdown` is cancelled.
pub async fn start_server(
    state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    log::info!("Server listening on http://{}", listener.local_addr()?);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    log::info!("[Server] HTTP server stopped");
    Ok(())
}
