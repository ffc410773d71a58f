//! REST API module using Axum
//!
//! HTTP surface for operator clients (control tablets and wall screens):
//! - Zone activation / deactivation
//! - Manual lamp and device control
//! - Gateway health, sync state, lamp states
//! - Emergency event history and weather readings

pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    // CORS is permissive: clients are kiosks on the closed site network.
    let cors = CorsLayer::permissive();

    Router::new()
        .nest("/api", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// API error type for consistent error responses
#[derive(Debug)]
pub struct ApiError {
    pub status: axum::http::StatusCode,
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            message: message.into(),
            code: "NOT_FOUND".to_string(),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });

        (self.status, axum::Json(body)).into_response()
    }
}
