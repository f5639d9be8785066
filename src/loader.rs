//! Startup-time model construction.
//!
//! The backbone graph and the trained head weights ship as two artifacts. The
//! head file is the Keras weights of the two dense layers exported to JSON,
//! kernels in `(in, out)` layout:
//!
//! ```json
//! {
//!   "dense":  { "kernel": [[...256 floats], ...2048 rows], "bias": [...256 floats] },
//!   "output": { "kernel": [[f], ...256 rows],             "bias": [f] }
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::error::LoadError;
use crate::network::{Activation, ClassifierHead, Dense, Network, OnnxBackbone, FEATURE_DIM};

/// Where the two halves of the network live on disk.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    pub backbone: PathBuf,
    pub head_weights: PathBuf,
}

#[derive(Debug, Deserialize)]
struct LayerWeights {
    kernel: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct HeadWeights {
    dense: LayerWeights,
    output: LayerWeights,
}

impl LayerWeights {
    fn into_dense(self, name: &str, activation: Activation) -> Result<Dense, LoadError> {
        let rows = self.kernel.len();
        let cols = self.kernel.first().map_or(0, Vec::len);
        if rows == 0 || cols == 0 {
            return Err(LoadError::Architecture(format!("{name} kernel is empty")));
        }
        if let Some(bad) = self.kernel.iter().position(|row| row.len() != cols) {
            return Err(LoadError::Architecture(format!(
                "{name} kernel row {bad} has {} columns, expected {cols}",
                self.kernel[bad].len()
            )));
        }

        let flat: Vec<f32> = self.kernel.into_iter().flatten().collect();
        let kernel = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| LoadError::Architecture(format!("{name} kernel: {e}")))?;

        Dense::new(kernel, Array1::from(self.bias), activation)
    }
}

/// Reads the head weights and rebuilds `dense(256, relu) -> dropout -> dense(1, sigmoid)`.
pub fn load_head(path: &Path) -> Result<ClassifierHead, LoadError> {
    let raw = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => LoadError::Missing {
            path: path.to_path_buf(),
        },
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let weights: HeadWeights =
        serde_json::from_slice(&raw).map_err(|source| LoadError::Weights {
            path: path.to_path_buf(),
            source,
        })?;

    let hidden = weights.dense.into_dense("dense", Activation::Relu)?;
    let output = weights.output.into_dense("output", Activation::Sigmoid)?;
    let head = ClassifierHead::new(hidden, output)?;

    if head.input_dim() != FEATURE_DIM {
        return Err(LoadError::Architecture(format!(
            "head expects {} input features, the backbone emits {FEATURE_DIM}",
            head.input_dim()
        )));
    }

    tracing::debug!(
        path = %path.display(),
        input_dim = head.input_dim(),
        dropout_rate = head.dropout_rate(),
        "head weights loaded"
    );
    Ok(head)
}

/// Builds the full network. Called once before the server accepts traffic;
/// any error here is fatal.
pub fn load_model(artifacts: ModelArtifacts) -> Result<Network, LoadError> {
    let started = Instant::now();
    tracing::info!(
        backbone = %artifacts.backbone.display(),
        head_weights = %artifacts.head_weights.display(),
        "loading model"
    );

    // Head first: it is cheap and catches a wrong weights file before the
    // backbone graph is optimized.
    let head = load_head(&artifacts.head_weights)?;
    let backbone = OnnxBackbone::load(&artifacts.backbone)?;
    let network = Network::new(Box::new(backbone), head)?;

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "model loaded"
    );
    Ok(network)
}
