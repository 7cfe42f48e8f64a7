//! HTTP API server for the consultation form

pub mod consult;
pub mod health;
pub mod voice;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::DEFAULT_MAX_UPLOAD_BYTES;
use crate::consultation::Doctor;
use crate::voice::OutputFormat;
use crate::{Config, Result};

/// Form page served when no static directory is configured
const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Shared state for API handlers
pub struct ApiState {
    /// Consultation pipeline
    pub doctor: Arc<Doctor>,
    /// Format of synthesized answers
    pub audio_format: OutputFormat,
    /// Whether a transcription/chat credential is configured
    pub stt_available: bool,
    /// Whether a synthesis credential is configured
    pub tts_available: bool,
    /// Bumped whenever a consultation produces a new spoken answer; 0 means none yet
    pub audio_version: AtomicU64,
    /// Request body limit for the upload endpoints, in bytes
    pub upload_limit: usize,
}

impl ApiState {
    /// State over an existing pipeline, with both services assumed available
    #[must_use]
    pub fn new(doctor: Arc<Doctor>, audio_format: OutputFormat) -> Self {
        Self {
            doctor,
            audio_format,
            stt_available: true,
            tts_available: true,
            audio_version: AtomicU64::new(0),
            upload_limit: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Override the upload body limit
    #[must_use]
    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit = bytes;
        self
    }

    /// Build the pipeline and state from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the pipeline cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let doctor = Arc::new(Doctor::from_config(config)?);

        Ok(Self {
            stt_available: config.api_keys.groq.is_some(),
            tts_available: config.api_keys.elevenlabs.is_some(),
            upload_limit: config.api_server.max_upload_bytes,
            ..Self::new(doctor, config.voice.tts_format)
        })
    }
}

/// Serves the form and the consultation API
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Server over `state`, listening on `port` once run
    #[must_use]
    pub fn new(state: Arc<ApiState>, port: u16) -> Self {
        Self {
            state,
            port,
            static_dir: None,
        }
    }

    /// Serve the form from a directory instead of the built-in page
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the application router
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api/consult", consult::router(self.state.clone()))
            .nest("/api/voice", voice::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        } else {
            router = router.route("/", get(index));
        }

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Listen until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
            })
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// API errors shared by the handlers
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request (400)
    BadRequest(String),
    /// Nothing to serve yet (404)
    NotFound(&'static str),
    /// Upload exceeds the body limit (413)
    TooLarge(String),
    /// A required credential is missing (503)
    NotConfigured(&'static str),
    /// Any other failure (500)
    Internal(String),
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge(e.body_text())
        } else {
            Self::BadRequest(e.body_text())
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.to_string()),
            Self::TooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg),
            Self::NotConfigured(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                msg.to_string(),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
