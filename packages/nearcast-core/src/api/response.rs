//! JSON response helpers shared by the HTTP handlers.
//!
//! Errors are rendered by [`NearcastError`](crate::error::NearcastError)'s
//! `IntoResponse` impl; these cover the success side.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// 200 with the serialized payload as body.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// 200 with `{ "success": true }`.
pub fn api_ok() -> impl IntoResponse {
    api_success(json!({ "success": true }))
}
