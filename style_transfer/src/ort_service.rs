use crate::{
    config::ModelConfig,
    model_service::{ModelError, ModelService},
};
use ndarray::{Array4, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the same transformation network.
/// Requests are spread round-robin; a session runs one inference at a time.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        model_config.validate().map_err(ModelError::Load)?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let builder = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?;
                #[cfg(feature = "tensorrt")]
                let builder = builder.with_execution_providers([
                    ort::execution_providers::TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .build(),
                ])?;
                let session = builder.commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        let output_name = {
            let session = sessions[0]
                .lock()
                .map_err(|e| ModelError::Load(format!("session mutex poisoned: {}", e)))?;
            check_signature(&session)?
        };

        tracing::info!(
            "Created {} ONNX sessions from {:?}, reading output `{}`",
            num_instances,
            model_config.get_path(),
            output_name
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name,
        })
    }
}

/// The network takes a single image tensor; returns the name of the output to read.
fn check_signature(session: &Session) -> Result<String, ModelError> {
    if session.inputs.len() != 1 {
        return Err(ModelError::Load(format!(
            "expected a single input tensor, graph declares {}",
            session.inputs.len()
        )));
    }
    session
        .outputs
        .first()
        .map(|output| output.name.clone())
        .ok_or_else(|| ModelError::Load("graph declares no outputs".to_string()))
}

impl ModelService for OrtModelService {
    fn transform(&self, input: Array4<f32>) -> Result<Array4<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let input = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            ModelError::Inference(format!("missing output `{}`", self.output_name))
        })?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .and_then(|array| array.into_dimensionality::<Ix4>())
            .map_err(|e| ModelError::Inference(format!("invalid tensor shape: {}", e)))
    }
}
