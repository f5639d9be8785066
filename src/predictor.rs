use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PredictError;
use crate::network::Model;
use crate::preprocess;

/// Scores strictly above this are "real". A score of exactly 0.5 is
/// "AI-generated".
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    #[serde(rename = "real")]
    Real,
    #[serde(rename = "AI-generated")]
    AiGenerated,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::AiGenerated => "AI-generated",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: Label,
    /// Probability of `label`, always in [0.5, 1.0].
    pub confidence: f32,
    /// Unmodified sigmoid output of the network.
    pub raw_score: f32,
}

impl Prediction {
    pub fn from_raw_score(raw_score: f32) -> Self {
        if raw_score > DECISION_THRESHOLD {
            Self {
                label: Label::Real,
                confidence: raw_score,
                raw_score,
            }
        } else {
            Self {
                label: Label::AiGenerated,
                confidence: 1.0 - raw_score,
                raw_score,
            }
        }
    }
}

/// Runs uploads through the shared, read-only model.
#[derive(Clone)]
pub struct Predictor {
    model: Arc<dyn Model>,
}

impl Predictor {
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    pub fn predict(&self, bytes: &[u8]) -> Result<Prediction, PredictError> {
        let input = preprocess::prepare(bytes)?;
        let raw_score = self.model.forward(input.view())?;
        if !(0.0..=1.0).contains(&raw_score) {
            return Err(PredictError::Inference(format!(
                "model returned {raw_score}, outside [0, 1]"
            )));
        }

        Ok(Prediction::from_raw_score(raw_score))
    }
}

impl fmt::Debug for Predictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predictor").finish_non_exhaustive()
    }
}
