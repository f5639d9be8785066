use std::path::PathBuf;

use clap::Parser;

use crate::loader::ModelArtifacts;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Real vs. AI-generated image detection service", long_about = None)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "DETECTOR_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "DETECTOR_PORT", default_value_t = 5000)]
    pub port: u16,

    /// ONNX export of the frozen ResNet50 feature extractor
    #[arg(long, env = "DETECTOR_BACKBONE", default_value = "models/resnet50_notop.onnx")]
    pub backbone: PathBuf,

    /// Trained classifier head weights (JSON)
    #[arg(long, env = "DETECTOR_WEIGHTS", default_value = "models/resnet50_cifake_head.json")]
    pub weights: PathBuf,

    /// Largest accepted upload in bytes
    #[arg(long, env = "DETECTOR_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// HTTP worker threads (defaults to the number of physical cores)
    #[arg(long, env = "DETECTOR_WORKERS")]
    pub workers: Option<usize>,
}

impl Config {
    pub fn artifacts(&self) -> ModelArtifacts {
        ModelArtifacts {
            backbone: self.backbone.clone(),
            head_weights: self.weights.clone(),
        }
    }

    /// Host and port as handed to the server; hostnames are resolved at bind time.
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }
}
