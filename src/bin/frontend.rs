//! # Front-End Binary Entry Point
//!
//! HTTP ingress for the cluster. Coordinators connect to
//! `coordinator_listen_address`; browsers and scripts upload images to the
//! HTTP API, which hands each one to the dispatch pool.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin frontend -- --config config/frontend.toml
//! curl -F image=@photo.png http://127.0.0.1:3000/api/compress -o compressed.jpg
//! ```
//!
//! ## Endpoints
//!
//! - `POST /api/compress`: multipart field `image`, answers with the compressed image
//!   (uploads above [`MAX_PAYLOAD_SIZE`] are refused)
//! - `GET /api/health`: link count and dispatch counters as JSON

use axum::{
    extract::{multipart::Multipart, DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use image::ImageFormat;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use dct_cluster::common::config::{load_config, FrontendConfig};
use dct_cluster::common::logging::init_logger;
use dct_cluster::common::messages::MAX_PAYLOAD_SIZE;
use dct_cluster::dispatch::DispatchPool;
use dct_cluster::ClusterError;

/// Command-line arguments for the front-end binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the front-end configuration file (TOML format)
    ///
    /// Example: config/frontend.toml
    #[arg(short, long)]
    config: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

struct AppState {
    pool: Arc<DispatchPool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: FrontendConfig = load_config(&args.config)?;

    info!("🚀 Initializing front end...");

    let pool = Arc::new(DispatchPool::new(config.dispatch()));

    let coordinator_listener = tokio::net::TcpListener::bind(&config.coordinator_listen_address).await?;
    info!(
        "📡 Waiting for coordinators on {}",
        config.coordinator_listen_address
    );
    let acceptor = pool.clone();
    tokio::spawn(async move { acceptor.serve_coordinators(coordinator_listener).await });

    let state = Arc::new(AppState { pool });

    let app = Router::new()
        .route("/api/compress", post(compress_handler))
        .route("/api/health", get(health_check))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!("🌐 Web server running on http://{}", config.http_listen_address);
    info!(
        "📡 API endpoint: http://{}/api/compress",
        config.http_listen_address
    );

    let listener = tokio::net::TcpListener::bind(&config.http_listen_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let links = state.pool.link_count().await;
    let busy = state.pool.busy_count().await;

    Json(serde_json::json!({
        "status": "ok",
        "service": "dct-compression",
        "coordinator_links": links,
        "busy_links": busy,
        "stats": state.pool.stats().snapshot(),
    }))
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

async fn compress_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or("image").to_string();
            let data = field.bytes().await.map_err(|e| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    format!("Failed to read image data: {}", e),
                )
            })?;
            upload = Some((filename, data.to_vec()));
        }
    }

    let (filename, data) = upload
        .filter(|(_, data)| !data.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "No image provided"))?;

    info!("📥 Received upload: {} ({} bytes)", filename, data.len());

    match state.pool.submit(data).await {
        Ok(compressed) => {
            info!(
                "✅ Compressed {} ({} bytes)",
                filename,
                compressed.len()
            );
            let content_type = match image::guess_format(&compressed) {
                Ok(ImageFormat::Png) => "image/png",
                Ok(ImageFormat::Jpeg) => "image/jpeg",
                _ => "application/octet-stream",
            };
            Ok(([(header::CONTENT_TYPE, content_type)], compressed))
        }
        Err(e) => {
            let status = match &e {
                ClusterError::PoolSaturated { .. } => StatusCode::SERVICE_UNAVAILABLE,
                ClusterError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ClusterError::FrameTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_GATEWAY,
            };
            if status == StatusCode::SERVICE_UNAVAILABLE {
                warn!("⚠️  Turned away {}: {}", filename, e);
            } else {
                error!("❌ Compression of {} failed: {}", filename, e);
            }
            Err(api_error(status, e.to_string()))
        }
    }
}
