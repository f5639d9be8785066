use std::io::Cursor;
use std::sync::Arc;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use ndarray::ArrayView4;
use serde_json::Value;

use detector::handlers::{self, UploadLimit};
use detector::{Model, PredictError, Predictor};

const BOUNDARY: &str = "----detector-test-boundary";

struct Constant(f32);

impl Model for Constant {
    fn forward(&self, _input: ArrayView4<'_, f32>) -> Result<f32, PredictError> {
        Ok(self.0)
    }
}

struct Broken;

impl Model for Broken {
    fn forward(&self, input: ArrayView4<'_, f32>) -> Result<f32, PredictError> {
        Err(PredictError::Inference(format!(
            "unexpected rank {}",
            input.ndim()
        )))
    }
}

fn red_png() -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])))
        .write_to(&mut buf, ImageOutputFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn multipart(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_detect(model: Arc<dyn Model>, limit: usize, body: Vec<u8>) -> (StatusCode, Value) {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Predictor::new(model)))
            .app_data(web::Data::new(UploadLimit(limit)))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/detect")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    let status = resp.status();
    let json: Value = test::read_body_json(resp).await;
    (status, json)
}

#[actix_rt::test]
async fn detects_ai_generated_image() {
    let body = multipart("image", Some("red.png"), &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.12)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["result"]["label"], "AI-generated");
    let confidence = json["result"]["confidence"].as_f64().unwrap();
    let raw_score = json["result"]["raw_score"].as_f64().unwrap();
    assert!((confidence - 0.88).abs() < 1e-6);
    assert!((raw_score - 0.12).abs() < 1e-6);
}

#[actix_rt::test]
async fn detects_real_image_with_uppercase_extension() {
    let body = multipart("image", Some("PHOTO.JPEG"), &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.93)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["label"], "real");
}

#[actix_rt::test]
async fn missing_image_field() {
    let body = multipart("file", Some("red.png"), &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No image uploaded");
}

#[actix_rt::test]
async fn image_field_without_filename_counts_as_missing() {
    let body = multipart("image", None, &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No image uploaded");
}

#[actix_rt::test]
async fn empty_filename() {
    let body = multipart("image", Some(""), &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No image selected");
}

#[actix_rt::test]
async fn rejected_extension() {
    let body = multipart("image", Some("anim.gif"), &red_png());
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Invalid file type. Use PNG, JPG, JPEG or WEBP");
}

#[actix_rt::test]
async fn undecodable_bytes_are_a_client_error() {
    let body = multipart("image", Some("fake.png"), b"this is not a png");
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("Invalid image"));
}

#[actix_rt::test]
async fn empty_upload_is_a_client_error() {
    let body = multipart("image", Some("empty.webp"), b"");
    let (status, json) = post_detect(Arc::new(Constant(0.5)), 1 << 20, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().starts_with("Invalid image"));
}

#[actix_rt::test]
async fn oversized_upload() {
    let body = multipart("image", Some("red.png"), &red_png());
    let (status, _) = post_detect(Arc::new(Constant(0.5)), 16, body).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[actix_rt::test]
async fn inference_failure_is_a_server_error() {
    let body = multipart("image", Some("red.png"), &red_png());
    let (status, json) = post_detect(Arc::new(Broken), 1 << 20, body).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json["error"],
        "Detection failed: inference failed: unexpected rank 4"
    );
}

#[actix_rt::test]
async fn home_and_health() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(Predictor::new(Arc::new(Constant(0.5)))))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["message"], "AI Detection Backend Running!");

    let req = test::TestRequest::get().uri("/health").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
}
