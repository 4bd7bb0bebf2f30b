//! Wire-level constants shared with clients, plus tunable defaults.
//!
//! The event names and header names are part of the client contract and
//! must not change without a coordinated client release.

// ─────────────────────────────────────────────────────────────────────────────
// SSE Event Names
// ─────────────────────────────────────────────────────────────────────────────

/// Handshake event sent as soon as a stream is opened.
pub const EVENT_INIT: &str = "init";

/// Payload of the handshake event.
pub const EVENT_INIT_DATA: &str = "ok";

/// A broadcaster became visible to the recipient.
pub const EVENT_BROADCAST_ON: &str = "broadcast.on";

/// A broadcaster stopped being visible to the recipient.
pub const EVENT_BROADCAST_OFF: &str = "broadcast.off";

/// Like count / radius update for a broadcaster already visible.
pub const EVENT_BROADCAST_LIKE: &str = "broadcast.like";

// ─────────────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Header carrying the caller's user id, set by the authenticating gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

// ─────────────────────────────────────────────────────────────────────────────
// Geography
// ─────────────────────────────────────────────────────────────────────────────

/// Mean Earth radius (meters), IUGG value used for haversine distance.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

// ─────────────────────────────────────────────────────────────────────────────
// Delivery Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default bound on one send attempt to one push channel (milliseconds).
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 250;

/// Default capacity of a user's outbound event queue.
pub const DEFAULT_PUSH_CHANNEL_CAPACITY: usize = 64;

/// Default interval between SSE keep-alive comments (seconds).
pub const DEFAULT_SSE_KEEPALIVE_SECS: u64 = 15;

/// Default interval between closed-connection sweeps (seconds).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Subdirectory of the data dir holding one journal file per broadcaster.
pub const BROADCAST_JOURNAL_DIR: &str = "broadcasts";

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "nearcast";
