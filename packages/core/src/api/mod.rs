//! Read-only status API, served only when `STATUS_PORT` is set.

pub mod headers;
pub mod health;
pub mod status;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::metrics::AppMetrics;
use status::{StatusApiState, StatusState};

/// Assemble the full router: `/health`, `/status`, `/status/history` and,
/// when metrics are enabled, `/metrics`.
pub fn create_router(state: StatusApiState) -> Router {
    let metrics = state.feed.metrics.clone();

    let mut app = Router::new()
        .route("/health", get(health::health))
        .merge(create_status_router(Arc::new(state)));

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(render_metrics))
                .with_state(metrics),
        );
    }

    app.layer(
        CorsLayer::new()
            .allow_methods([Method::GET])
            .allow_origin(Any),
    )
    .layer(TraceLayer::new_for_http())
}

pub fn create_status_router(state: StatusState) -> Router {
    Router::new()
        .route("/status", get(status::status))
        .route("/status/history", get(status::history))
        .with_state(state)
}

async fn render_metrics(State(metrics): State<Arc<AppMetrics>>) -> Response {
    let rendered = metrics.render().map_err(|err| err.to_string()).and_then(|body| {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body))
            .map_err(|err| err.to_string())
    });

    match rendered {
        Ok(response) => response,
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            let mut response = Response::new(Body::from("metrics error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Bind `0.0.0.0:{port}` and serve `router` until the process exits.
pub async fn serve(port: u16, router: Router) -> Result<(), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}
