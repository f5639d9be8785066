//! Real vs. AI-generated image detection.
//!
//! [`loader::load_model`] rebuilds the classifier once at startup;
//! [`Predictor`] turns uploaded bytes into a [`Prediction`]; [`handlers`]
//! exposes it over HTTP.

pub mod config;
pub mod error;
pub mod handlers;
pub mod loader;
pub mod models;
pub mod network;
pub mod predictor;
pub mod preprocess;
pub mod telemetry;

pub use error::{LoadError, PredictError};
pub use loader::{load_model, ModelArtifacts};
pub use network::{Backbone, ClassifierHead, Model, Network};
pub use predictor::{Label, Prediction, Predictor};
