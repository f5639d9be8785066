use std::time::Instant;

use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use futures_util::StreamExt;
use thiserror::Error;
use uuid::Uuid;

use crate::error::PredictError;
use crate::models::{DetectResponse, ErrorResponse, HealthResponse, StatusMessage};
use crate::predictor::Predictor;

/// Multipart field that carries the upload.
pub const IMAGE_FIELD: &str = "image";
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Largest upload, in bytes, that `/detect` will buffer.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimit(pub usize);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image uploaded")]
    NoImage,
    #[error("No image selected")]
    NoFilename,
    #[error("Invalid file type. Use PNG, JPG, JPEG or WEBP")]
    InvalidFileType,
    #[error("Image exceeds the {0} byte upload limit")]
    TooLarge(usize),
    #[error("Malformed upload: {0}")]
    Multipart(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Detection failed: {0}")]
    Detection(String),
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::Decode(e) => Self::InvalidImage(e.to_string()),
            other => Self::Detection(other.to_string()),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Detection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

/// Case-insensitive check on whatever follows the last `.`.
pub fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        .unwrap_or(false)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/detect").route(web::post().to(detect)));
}

pub async fn home() -> HttpResponse {
    HttpResponse::Ok().json(StatusMessage {
        message: "AI Detection Backend Running!".to_string(),
    })
}

pub async fn health(predictor: Option<web::Data<Predictor>>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: predictor.is_some(),
    })
}

pub async fn detect(
    predictor: web::Data<Predictor>,
    limit: web::Data<UploadLimit>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();

    let bytes = match read_upload(&mut payload, limit.0).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(%request_id, error = %e, "rejected upload");
            return Err(e);
        }
    };
    let size = bytes.len();

    let started = Instant::now();
    let outcome = web::block(move || predictor.predict(&bytes))
        .await
        .map_err(|e| ApiError::Detection(e.to_string()))?;

    match outcome {
        Ok(prediction) => {
            tracing::info!(
                %request_id,
                bytes = size,
                label = %prediction.label,
                raw_score = prediction.raw_score,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "detection complete"
            );
            Ok(HttpResponse::Ok().json(DetectResponse {
                success: true,
                result: prediction,
            }))
        }
        Err(e) if e.is_client_error() => {
            tracing::warn!(%request_id, bytes = size, error = %e, "undecodable image");
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(%request_id, bytes = size, error = %e, "detection failed");
            Err(e.into())
        }
    }
}

/// Pulls the `image` field out of the form, validating its filename and
/// size. Every other field is drained and ignored.
async fn read_upload(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, ApiError> {
    let mut image: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::Multipart(e.to_string()))?;
        let disposition = field.content_disposition();

        // A field without a filename is plain form data, not an upload.
        let upload_name = match (disposition.get_name(), disposition.get_filename()) {
            (Some(IMAGE_FIELD), Some(name)) if image.is_none() => Some(name.to_owned()),
            _ => None,
        };
        let Some(filename) = upload_name else {
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
            }
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::NoFilename);
        }
        if !has_allowed_extension(&filename) {
            return Err(ApiError::InvalidFileType);
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
            if data.len() + chunk.len() > limit {
                return Err(ApiError::TooLarge(limit));
            }
            data.extend_from_slice(&chunk);
        }
        image = Some(data);
    }

    image.ok_or(ApiError::NoImage)
}
