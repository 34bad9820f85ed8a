mod imaging;
mod ort_service;
mod routes;
mod scratch;
mod telemetry;

pub mod app;
pub mod config;
pub mod model_service;
pub mod server;
pub mod stylize;

pub use app::start_app;
pub use model_service::{ModelError, ModelService};
pub use ort_service::OrtModelService;
pub use telemetry::Metrics;
