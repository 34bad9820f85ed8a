use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A loaded transformation network. Implementations are shared between
/// requests, so a call must not depend on any previous one.
pub trait ModelService: Send + Sync + 'static {
    fn transform(&self, input: Array4<f32>) -> Result<Array4<f32>, ModelError>;
}
