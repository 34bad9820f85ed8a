mod health;
mod metrics;
mod style_transfer;

use crate::{model_service::ModelService, server::SharedState, telemetry::Metrics};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use health::healthcheck;
pub use metrics::metrics_handler;
pub use style_transfer::style_transfer;

pub const STYLE_TRANSFER_ROUTE: &str = "/styleTransfer";

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route(STYLE_TRANSFER_ROUTE, post(style_transfer::<M>))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(healthcheck))
}

/// Routes served by the standalone exporter listener.
pub fn exporter_routes() -> Router<Arc<Metrics>> {
    Router::new().route("/metrics", get(metrics_handler))
}
