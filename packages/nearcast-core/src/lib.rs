//! Nearcast Core - proximity-aware track broadcasting.
//!
//! Users broadcast the track they are listening to from their current
//! position. Every like widens the broadcast's visibility radius, and
//! listeners inside the radius receive live notifications over a
//! server-sent event stream.
//!
//! # Architecture
//!
//! - [`services`]: broadcast state, geo index, connection registry, fan-out
//! - [`events`]: notification events and push channels
//! - [`api`]: HTTP handlers, SSE stream, server startup
//! - [`bootstrap`]: dependency wiring
//! - [`state`]: configuration
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`PushChannel`](events::PushChannel): per-user outbound event channel
//! - [`BroadcastJournal`](services::BroadcastJournal): durable commit target
//! - [`TrackCatalog`](services::TrackCatalog) and
//!   [`UserDirectory`](services::UserDirectory): external collaborators
//! - [`Authenticator`](api::Authenticator): caller identity

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;

pub use error::{BroadcastKey, DeliveryError, ErrorCode, NearcastError, NearcastResult};
pub use events::{NotificationEvent, PushChannel, SsePushChannel};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Config, DeliveryConfig, InactiveLikePolicy, RadiusPolicy, RadiusTier};
pub use types::{BroadcastId, GeoPoint, RadiusMeter, TrackDescriptor, TrackId, TrackRef, UserId};
pub use utils::{haversine_meters, now_millis};

pub use services::{BroadcastService, BroadcastStore, ConnectionRegistry, FanoutEngine, GeoIndex};

pub use bootstrap::{bootstrap_services, BootstrappedServices};

pub use api::{bind, start_server, AppState, AppStateBuilder, ServerError};
