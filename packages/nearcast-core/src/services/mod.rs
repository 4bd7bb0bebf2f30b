//! Application services layer.
//!
//! The store owns committed broadcast state; the fan-out engine turns
//! committed outcomes into notifications. `BroadcastService` wires the two
//! together for the API layer.

pub mod broadcast_service;
pub mod broadcast_store;
pub mod catalog;
pub mod connection_registry;
pub mod directory;
pub mod fanout;
pub mod geo_index;
pub mod journal;
pub mod post_commit;

pub use broadcast_service::{
    BroadcastService, BroadcastStarted, LikeAccepted, MyBroadcast, NearbyBroadcaster,
};
pub use broadcast_store::{BroadcastRecord, BroadcastStore, BroadcasterState, TrackStats};
pub use catalog::{InMemoryTrackCatalog, TrackCatalog};
pub use connection_registry::{ConnectionId, ConnectionRegistry, RegistrationGuard};
pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use fanout::{AudienceDiff, DeliveryReport, FanoutEngine};
pub use geo_index::GeoIndex;
pub use journal::{BroadcastJournal, JsonFileJournal, MemoryJournal};
pub use post_commit::PostCommit;
