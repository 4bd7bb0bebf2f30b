//! Centralized error types for the Nearcast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses
//!
//! Delivery failures have their own [`DeliveryError`] type. They are resolved
//! inside the fan-out engine and never reach the caller of a state change.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::types::{BroadcastId, UserId};

/// Message returned to clients for unclassified failures.
const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Nearcast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum NearcastError {
    /// Missing or invalid caller identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Track descriptor without a stable external identifier.
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The referenced broadcaster has never broadcast.
    #[error("Broadcast not found: {0}")]
    BroadcastNotFound(BroadcastKey),

    /// The operation requires an active broadcast.
    #[error("Broadcast is not active for user {0}")]
    NotActive(UserId),

    /// Server configuration error (invalid radius tiers, zero capacities).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal server error. The detail is logged, never returned to clients.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ErrorCode for NearcastError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidTrack(_) => "invalid_track",
            Self::InvalidRequest(_) => "invalid_request",
            Self::BroadcastNotFound(_) => "broadcast_not_found",
            Self::NotActive(_) => "broadcast_not_active",
            Self::Configuration(_) => "configuration_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl NearcastError {
    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidTrack(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::BroadcastNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotActive(_) => StatusCode::CONFLICT,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message that is safe to show to a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// How a missing broadcast was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BroadcastKey {
    /// Looked up by owning user.
    Sender(UserId),
    /// Looked up by broadcast id.
    Id(BroadcastId),
}

impl std::fmt::Display for BroadcastKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sender(id) => write!(f, "sender {}", id),
            Self::Id(id) => write!(f, "broadcast {}", id),
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type NearcastResult<T> = Result<T, NearcastError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for NearcastError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal(ref detail) = self {
            log::error!("[API] Internal error: {}", detail);
        }
        let body = ErrorResponse {
            error: self.code(),
            message: self.public_message(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for NearcastError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for NearcastError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure to hand one event to one push channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The receiving side of the channel is gone.
    #[error("push channel unavailable")]
    ChannelUnavailable,

    /// The channel stayed full for the whole send window.
    #[error("push channel send timed out after {0}ms")]
    Timeout(u64),
}

impl ErrorCode for DeliveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::ChannelUnavailable => "channel_unavailable",
            Self::Timeout(_) => "channel_timeout",
        }
    }
}
