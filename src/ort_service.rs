use crate::{
    config::ModelConfig,
    model_service::{ModelError, ModelService},
};
use async_trait::async_trait;
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the cats/dogs classifier.
///
/// `Session::run` needs `&mut self`, so each session sits behind a mutex and
/// requests pick one round-robin; concurrent calls into the same session are
/// serialized by its lock.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let model_path = model_config.get_model_path();
        if !model_path.exists() {
            return Err(format!("model file not found: {}", model_path.display()).into());
        }

        let num_instances = model_config.num_instances;
        if num_instances == 0 {
            return Err("model.num_instances must be at least 1".into());
        }

        ort::init().with_name("catdog_inference").commit()?;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions", num_instances);

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
        })
    }

    fn run_inference(&self, batch: &Array4<f32>) -> Result<Vec<f32>, ModelError> {
        let batch_size = batch.dim().0;
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if batch.view().is_standard_layout() {
            batch.view()
        } else {
            owned_buffer = batch.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)?;
        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session.run(input_tensor)?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        // Sigmoid head: the output must flatten to one scalar per image,
        // shape (N, 1) or (N,).
        if dims.first() != Some(&batch_size) || data.len() != batch_size {
            return Err(ModelError::MalformedOutput {
                expected: batch_size,
                got: dims,
            });
        }

        Ok(data.to_vec())
    }
}

#[async_trait]
impl ModelService for OrtModelService {
    async fn predict(&self, batch: Array4<f32>) -> Result<Vec<f32>, ModelError> {
        self.run_inference(&batch)
    }
}
