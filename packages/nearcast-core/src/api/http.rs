//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::auth::AuthUser;
use crate::api::response::{api_ok, api_success};
use crate::api::{sse, AppState};
use crate::error::{NearcastError, NearcastResult};
use crate::protocol_constants::SERVICE_ID;
use crate::types::{BroadcastId, GeoPoint, TrackDescriptor};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TurnOnRequest {
    lat: f64,
    lon: f64,
    #[serde(default)]
    music: TrackDescriptor,
}

#[derive(Deserialize)]
struct ChangeMusicRequest {
    #[serde(default)]
    music: TrackDescriptor,
}

#[derive(Deserialize)]
struct LocationRequest {
    lat: f64,
    lon: f64,
}

/// Unwraps a JSON body, reporting malformed input as `InvalidRequest`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> NearcastResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| NearcastError::InvalidRequest(rejection.body_text()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/sse/stream", get(sse::subscribe))
        .route("/api/sse/location/update", post(update_location))
        .route("/api/sse/location/nearby", get(nearby_broadcasters))
        .route("/api/broadcast/on", post(turn_on))
        .route("/api/broadcast/off", post(turn_off))
        .route("/api/broadcast/changemusic", post(change_music))
        .route("/api/broadcast/me", get(my_broadcast))
        .route("/api/broadcast/me/tracks", get(my_track_stats))
        .route("/api/broadcast/{broadcast_id}/likes", post(like))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "connections": state.registry.size(),
    }))
}

async fn turn_on(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<TurnOnRequest>, JsonRejection>,
) -> NearcastResult<impl IntoResponse> {
    let request = body(payload)?;
    let position = GeoPoint::new(request.lat, request.lon)?;
    let started = state
        .service
        .turn_on(user_id, position, &request.music)
        .await?;
    Ok(api_success(started))
}

async fn turn_off(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> NearcastResult<impl IntoResponse> {
    state.service.turn_off(user_id).await?;
    Ok(api_ok())
}

async fn like(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(broadcast_id): Path<BroadcastId>,
) -> NearcastResult<impl IntoResponse> {
    let accepted = state.service.like(broadcast_id, user_id).await?;
    Ok(api_success(accepted))
}

async fn change_music(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<ChangeMusicRequest>, JsonRejection>,
) -> NearcastResult<impl IntoResponse> {
    let request = body(payload)?;
    let changed = state
        .service
        .change_track(user_id, &request.music)
        .await?;
    Ok(api_success(json!({ "changed": changed })))
}

async fn my_broadcast(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> impl IntoResponse {
    api_success(state.service.my_broadcast(user_id).await)
}

async fn my_track_stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> impl IntoResponse {
    api_success(state.service.track_stats(user_id).await)
}

async fn update_location(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<LocationRequest>, JsonRejection>,
) -> NearcastResult<impl IntoResponse> {
    let request = body(payload)?;
    let position = GeoPoint::new(request.lat, request.lon)?;
    let radius_meter = state.service.relocate(user_id, position).await?;
    Ok(api_success(json!({ "radiusMeter": radius_meter })))
}

async fn nearby_broadcasters(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> NearcastResult<impl IntoResponse> {
    let nearby = state.service.nearby(user_id).await?;
    Ok(api_success(nearby))
}
