use async_trait::async_trait;
use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("onnx session failed: {0}")]
    Session(#[from] ort::Error),
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("malformed model output: expected {expected} scalars, got shape {got:?}")]
    MalformedOutput { expected: usize, got: Vec<usize> },
}

/// Seam between the request pipeline and the loaded classifier: a batch of
/// normalized images in, one probability per image out, in input order.
#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, batch: Array4<f32>) -> Result<Vec<f32>, ModelError>;
}
