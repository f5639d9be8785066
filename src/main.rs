use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;

use detector::config::Config;
use detector::handlers::{self, UploadLimit};
use detector::{load_model, Predictor};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    detector::telemetry::init();

    let network = load_model(config.artifacts()).context("model failed to load, refusing to serve")?;
    let predictor = web::Data::new(Predictor::new(Arc::new(network)));
    let limit = web::Data::new(UploadLimit(config.max_upload_bytes));

    let (host, port) = config.bind_target();
    tracing::info!(host, port, "server running");

    let mut server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(predictor.clone())
            .app_data(limit.clone())
            .configure(handlers::configure)
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server
        .bind((host, port))
        .with_context(|| format!("could not bind {host}:{port}"))?
        .run()
        .await
        .context("server terminated")
}
