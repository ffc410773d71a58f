//! API route definitions
//!
//! Endpoints for the EGS operator clients:
//! - /api/zones/activate, /api/zones/deactivate - zone control
//! - /api/lamp, /api/lamp/{id}, /api/all, /api/route, /api/mask - manual control
//! - /api/health, /api/sync/state, /api/lamps - state snapshots
//! - /api/emergency-events, /api/weather/* - history and telemetry

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

/// Create all API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Zone control
        .route("/zones/activate", post(handlers::activate_zone))
        .route("/zones/deactivate", post(handlers::deactivate_zone))
        // Manual lamp / device control
        .route("/lamp", post(handlers::control_lamp))
        .route("/lamp/:lamp_id", post(handlers::control_lamp_by_id))
        .route("/all", post(handlers::control_all))
        .route("/route", post(handlers::control_route))
        .route("/mask", post(handlers::control_mask))
        // State snapshots
        .route("/health", get(handlers::get_health))
        .route("/sync/state", get(handlers::get_sync_state))
        .route("/lamps", get(handlers::get_lamps))
        .route("/test-connection", get(handlers::test_connection))
        // History and telemetry
        .route("/emergency-events", get(handlers::get_emergency_events))
        .route("/weather/latest", get(handlers::get_weather_latest))
        .route("/weather/recent", get(handlers::get_weather_recent))
        .with_state(state)
}
