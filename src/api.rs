pub(crate) mod coin_movement;
pub(crate) mod status;
pub(crate) mod types;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;
use uuid::Uuid;

/// State shared by the read API handlers
#[derive(Debug, Clone)]
pub(crate) struct ApiState {
    pub(crate) pool: SqlitePool,
    pub(crate) stream_id: Uuid,
}

/// Error returned by a handler; details are logged, not sent to the client
#[derive(Debug)]
pub(crate) struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = ?self.0, "API request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
    }
}

pub(crate) fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any);

    Router::new()
        .route(
            "/api/v1/coin-movement",
            get(coin_movement::get_coin_movements),
        )
        .route("/api/v1/status", get(status::get_stream_status))
        .layer(cors)
        .with_state(state)
}
