use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Startup failures. Any of these means the service must not start.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model artifact not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backbone graph {} could not be prepared: {message}", path.display())]
    Backbone { path: PathBuf, message: String },

    #[error("head weights {} are malformed: {source}", path.display())]
    Weights {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("architecture mismatch: {0}")]
    Architecture(String),
}

/// Per-request failures raised while turning an upload into a prediction.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("input tensor has shape {actual:?}, expected {expected:?}")]
    Shape {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("inference failed: {0}")]
    Inference(String),
}

impl PredictError {
    /// Decode failures are the caller's fault; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
