//! The classifier topology: a frozen feature-extraction backbone followed by
//! a small learned head.
//!
//! ```text
//! (1, 224, 224, 3) -> backbone -> (1, H, W, 2048)
//!                  -> global average pool -> (2048)
//!                  -> dense(256, relu) -> dropout(0.5) -> dense(1, sigmoid)
//! ```

use std::path::Path;
use std::time::Instant;

use ndarray::{Array1, Array2, Array4, ArrayView1, ArrayView4, Axis, Ix4};
use tract_core::prelude::{TypedModel, TypedRunnableModel};
use tract_onnx::prelude::*;

use crate::error::{LoadError, PredictError};
use crate::preprocess::INPUT_SHAPE;

/// Channels produced by the ResNet50 feature extractor.
pub const FEATURE_DIM: usize = 2048;
/// Width of the hidden dense layer in the head.
pub const HIDDEN_UNITS: usize = 256;
/// Dropout rate used during training. Has no effect at inference.
pub const DROPOUT_RATE: f32 = 0.5;

/// Anything that maps a preprocessed `(1, 224, 224, 3)` batch to a score in [0, 1].
pub trait Model: Send + Sync {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<f32, PredictError>;
}

/// The frozen half of the network. Implementations only expose a read-only
/// forward pass, so nothing downstream can adjust their parameters.
pub trait Backbone: Send + Sync {
    /// Number of channels in the feature map returned by [`Backbone::extract`].
    fn feature_dim(&self) -> usize;

    /// Returns an NHWC feature map of shape `(1, H, W, feature_dim)`.
    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PredictError>;
}

/// ResNet50 without its classification top, exported to ONNX and run by tract.
pub struct OnnxBackbone {
    plan: TypedRunnableModel<TypedModel>,
    feature_dim: usize,
}

impl OnnxBackbone {
    /// Parses, optimizes and plans the graph for a fixed `(1, 224, 224, 3)` input.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        if !path.is_file() {
            return Err(LoadError::Missing {
                path: path.to_path_buf(),
            });
        }

        let started = Instant::now();
        let backbone_err = |e: TractError| LoadError::Backbone {
            path: path.to_path_buf(),
            message: format!("{e:#}"),
        };

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact(INPUT_SHAPE).into()))
            .and_then(|m| m.into_optimized())
            .map_err(backbone_err)?;

        let feature_dim = feature_dim_of(&model)?;
        let plan = model.into_runnable().map_err(backbone_err)?;

        tracing::info!(
            path = %path.display(),
            feature_dim,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "backbone ready"
        );

        Ok(Self { plan, feature_dim })
    }
}

fn feature_dim_of(model: &TypedModel) -> Result<usize, LoadError> {
    let fact = model
        .output_fact(0)
        .map_err(|e| LoadError::Architecture(format!("backbone has no output: {e:#}")))?;
    let shape = fact
        .shape
        .as_concrete()
        .ok_or_else(|| LoadError::Architecture("backbone output shape is not concrete".into()))?;

    match shape {
        [1, h, w, c] if *h > 0 && *w > 0 && *c > 0 => Ok(*c),
        other => Err(LoadError::Architecture(format!(
            "backbone must emit a (1, H, W, C) feature map, got {other:?}"
        ))),
    }
}

impl Backbone for OnnxBackbone {
    fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    fn extract(&self, input: ArrayView4<'_, f32>) -> Result<Array4<f32>, PredictError> {
        let tensor: Tensor = input.to_owned().into();
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| PredictError::Inference(format!("{e:#}")))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| PredictError::Inference(format!("{e:#}")))?;
        let features = view
            .into_dimensionality::<Ix4>()
            .map_err(|e| PredictError::Inference(format!("backbone output: {e}")))?;

        Ok(features.to_owned())
    }
}

/// Averages a `(1, H, W, C)` feature map over its spatial axes.
pub fn global_average_pool(features: ArrayView4<'_, f32>) -> Result<Array1<f32>, PredictError> {
    if features.shape()[0] != 1 {
        return Err(PredictError::Inference(format!(
            "expected a single-item batch, got {}",
            features.shape()[0]
        )));
    }

    features
        .mean_axis(Axis(1))
        .and_then(|rows| rows.mean_axis(Axis(1)))
        .map(|pooled| pooled.index_axis_move(Axis(0), 0))
        .ok_or_else(|| PredictError::Inference("feature map has no spatial extent".into()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid if x >= 0.0 => 1.0 / (1.0 + (-x).exp()),
            Self::Sigmoid => {
                let e = x.exp();
                e / (1.0 + e)
            }
        }
    }
}

/// Fully connected layer with Keras kernel layout `(in, out)`.
#[derive(Debug, Clone)]
pub struct Dense {
    kernel: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl Dense {
    pub fn new(
        kernel: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    ) -> Result<Self, LoadError> {
        if kernel.ncols() != bias.len() {
            return Err(LoadError::Architecture(format!(
                "dense kernel has {} units but bias has {}",
                kernel.ncols(),
                bias.len()
            )));
        }
        Ok(Self {
            kernel,
            bias,
            activation,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn units(&self) -> usize {
        self.kernel.ncols()
    }

    fn forward(&self, x: ArrayView1<'_, f32>) -> Array1<f32> {
        let activation = self.activation;
        (x.dot(&self.kernel) + &self.bias).mapv_into(|v| activation.apply(v))
    }
}

/// Training-time regularizer. Inference never drops anything.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    pub rate: f32,
}

impl Dropout {
    fn forward(self, x: Array1<f32>) -> Array1<f32> {
        x
    }
}

/// The learned stage: dense(256, relu) -> dropout -> dense(1, sigmoid).
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    hidden: Dense,
    dropout: Dropout,
    output: Dense,
}

impl ClassifierHead {
    pub fn new(hidden: Dense, output: Dense) -> Result<Self, LoadError> {
        if hidden.activation != Activation::Relu || output.activation != Activation::Sigmoid {
            return Err(LoadError::Architecture(
                "head must be relu followed by sigmoid".into(),
            ));
        }
        if hidden.units() != HIDDEN_UNITS {
            return Err(LoadError::Architecture(format!(
                "hidden layer must have {HIDDEN_UNITS} units, got {}",
                hidden.units()
            )));
        }
        if output.input_dim() != hidden.units() || output.units() != 1 {
            return Err(LoadError::Architecture(format!(
                "output layer must map {} -> 1, got {} -> {}",
                hidden.units(),
                output.input_dim(),
                output.units()
            )));
        }

        Ok(Self {
            hidden,
            dropout: Dropout { rate: DROPOUT_RATE },
            output,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.hidden.input_dim()
    }

    /// Rate the head was trained with; never applied here.
    pub fn dropout_rate(&self) -> f32 {
        self.dropout.rate
    }

    pub fn forward(&self, pooled: ArrayView1<'_, f32>) -> Result<f32, PredictError> {
        if pooled.len() != self.input_dim() {
            return Err(PredictError::Inference(format!(
                "head expects {} features, got {}",
                self.input_dim(),
                pooled.len()
            )));
        }

        let hidden = self.dropout.forward(self.hidden.forward(pooled));
        Ok(self.output.forward(hidden.view())[0])
    }
}

/// Backbone and head glued together.
pub struct Network {
    backbone: Box<dyn Backbone>,
    head: ClassifierHead,
}

impl Network {
    pub fn new(backbone: Box<dyn Backbone>, head: ClassifierHead) -> Result<Self, LoadError> {
        if backbone.feature_dim() != head.input_dim() {
            return Err(LoadError::Architecture(format!(
                "backbone emits {} features but head expects {}",
                backbone.feature_dim(),
                head.input_dim()
            )));
        }
        Ok(Self { backbone, head })
    }
}

impl Model for Network {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<f32, PredictError> {
        if input.shape() != &INPUT_SHAPE[..] {
            return Err(PredictError::Shape {
                expected: INPUT_SHAPE,
                actual: input.shape().to_vec(),
            });
        }

        let features = self.backbone.extract(input)?;
        let pooled = global_average_pool(features.view())?;
        self.head.forward(pooled.view())
    }
}
