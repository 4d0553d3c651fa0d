//! HTTP surface for kbforge.
//!
//! Upload a document, poll its task, then download or preview the
//! knowledge base it produced. Handlers never wait for a job: an upload is
//! staged, recorded as `queued`, submitted to the worker pool and answered
//! with the task id.

mod error;
mod handlers;
mod rate_limit;
mod router;
mod upload;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;

use kbforge_core::DocumentProcessor;
use kbforge_shared::{AppConfig, GeminiConfig, KbForgeError, RateLimitConfig, Result};
use tokio::net::TcpListener;
use tracing::info;

pub use error::ApiError;
pub use router::create_router;
pub use upload::{secure_filename, staged_name};

/// Release date reported by `/api/version`.
pub const RELEASE_DATE: &str = "2026-01-16";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub processor: DocumentProcessor,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub gemini: GeminiConfig,
    pub rate_limit: RateLimitConfig,
}

impl AppState {
    pub fn new(processor: DocumentProcessor, config: &AppConfig) -> Self {
        Self {
            processor,
            upload_dir: config.server.upload_dir.clone(),
            max_upload_bytes: config.server.max_upload_bytes,
            gemini: config.gemini.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| KbForgeError::config(format!("listener has no local address: {e}")))?;
    info!(%addr, store = state.processor.store().backend_name(), "kbforge API listening");

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| KbForgeError::io(PathBuf::from(addr.to_string()), e))
}
