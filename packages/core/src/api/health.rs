use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};

/// Liveness of the controller process itself.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, [(header::CACHE_CONTROL, "no-store")], "ok")
}
