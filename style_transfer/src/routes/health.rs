use axum::response::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
}

/// Liveness only: the model is loaded before the listener is bound.
pub async fn healthcheck() -> Json<Health> {
    Json(Health {
        status: "Available",
    })
}
