//! Router construction and the serving loop.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use kinoscope::Camera;

use crate::mjpeg;

/// Where the HTTP front end binds.
pub struct ServeConfig {
    /// Bind address, or a Unix socket path when it starts with `/`.
    pub bind: String,
    /// TCP port; unused for Unix socket binds.
    pub port: u16,
}

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub camera: Arc<Camera>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(camera: Arc<Camera>) -> Self {
        Self {
            camera,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/stream.mjpg", get(stream_mjpg))
        .route("/snapshot.jpeg", get(snapshot_jpeg))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<head>
    <title>Index</title>
</head>
<body>
    <p>This is a small webcam streaming server.</p>
    <ul>
        <li><a href="/stream.mjpg">Webcam stream</a></li>
        <li><a href="/snapshot.jpeg">Webcam snapshot</a></li>
    </ul>
</body>
"#;

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Live MJPEG stream: one multipart part per frame until the client
/// disconnects or the camera closes the sink. Dropping the body stream
/// drops the sink, which deregisters itself from the camera.
async fn stream_mjpg(State(state): State<AppState>) -> Response {
    let boundary = mjpeg::response_boundary();
    let stream = state.camera.stream().await;
    let content_type = mjpeg::content_type(&boundary);

    let body = Body::from_stream(futures::stream::unfold(
        (stream, boundary),
        |(mut stream, boundary)| async move {
            let frame = stream.next().await?;
            let part = mjpeg::part(&boundary, &frame);
            Some((Ok::<_, Infallible>(part), (stream, boundary)))
        },
    ));

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// One-shot JPEG. 503 when the camera is faulted or shutting down and no
/// frame can be delivered.
async fn snapshot_jpeg(State(state): State<AppState>) -> Response {
    match state.camera.snapshot().await {
        Some(frame) => (
            [(header::CONTENT_TYPE, "image/jpeg")],
            frame,
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let capturing = state.camera.is_capturing().await;
    let sinks = state.camera.sink_count().await;
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "capturing": capturing,
        "sinks": sinks,
    }))
}

/// Serve until a shutdown signal arrives, then close the camera.
///
/// The signal handler evicts all sinks first so in-flight streaming
/// responses end and graceful shutdown can drain them; the device itself
/// is released once serving stops.
pub async fn run(config: &ServeConfig, camera: Arc<Camera>) -> Result<()> {
    let app = router(AppState::new(Arc::clone(&camera)));
    let shutdown = shutdown_signal(Arc::clone(&camera));

    #[cfg(unix)]
    {
        if config.bind.starts_with('/') {
            let listener = UnixListener::bind(&config.bind)
                .with_context(|| format!("failed to bind unix socket {}", config.bind))?;
            info!(socket = %config.bind, "serving");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
            camera.close().await;
            return Ok(());
        }
    }

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    camera.close().await;
    Ok(())
}

async fn shutdown_signal(camera: Arc<Camera>) {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "SIGINT handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, evicting sinks");
    camera.close_sinks().await;
}
