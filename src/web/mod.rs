//! Upload form and match results over HTTP.

pub mod gallery;
pub mod query;
pub mod render;
pub mod upload;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use facematch_vision::Embedder;
use log::{error, info, warn};
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::QueryError;
use crate::storage::EmbeddingStore;
use query::{QueryReply, NO_FILE};

/// Where uploads and gallery images live on disk.
#[derive(Debug, Clone)]
pub struct ServePaths {
    pub gallery_dir: PathBuf,
    pub public_dir: PathBuf,
}

impl ServePaths {
    pub fn uploads_dir(&self) -> PathBuf {
        self.public_dir.join("uploads")
    }

    pub fn known_dir(&self) -> PathBuf {
        self.public_dir.join("known")
    }
}

/// Everything a request handler needs. The store is read-only for the
/// lifetime of the server; the model needs exclusive access per call.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EmbeddingStore>,
    pub embedder: Arc<Mutex<dyn Embedder + Send>>,
    pub paths: Arc<ServePaths>,
    pub top_k: usize,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new<E: Embedder + Send + 'static>(store: EmbeddingStore, embedder: E, cfg: &Config) -> Self {
        Self {
            store: Arc::new(store),
            embedder: Arc::new(Mutex::new(embedder)),
            paths: Arc::new(ServePaths {
                gallery_dir: cfg.gallery_dir.clone(),
                public_dir: cfg.public_dir.clone(),
            }),
            top_k: cfg.top_k,
            max_upload_bytes: cfg.max_upload_bytes,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public = ServeDir::new(&state.paths.public_dir);
    let limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(index).post(submit))
        .nest_service("/static", public)
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

async fn index() -> Html<String> {
    Html(render::index_page(None))
}

fn malformed(message: &str) -> Response {
    warn!("rejected upload: {}", message);
    (
        StatusCode::BAD_REQUEST,
        Html(render::index_page(Some(message))),
    )
        .into_response()
}

/// First `image` field of the form as (file name, bytes).
async fn read_image_field(mut multipart: Multipart) -> Result<(String, Vec<u8>), String> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(NO_FILE.to_string()),
            Err(e) => return Err(format!("Could not read the upload: {}", e)),
        };
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(NO_FILE.to_string());
        }
        return match field.bytes().await {
            Ok(bytes) => Ok((file_name, bytes.to_vec())),
            Err(e) => Err(format!("Could not read the upload: {}", e)),
        };
    }
}

async fn submit(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(e) => return malformed(&format!("Could not read the upload: {}", e.body_text())),
    };
    let (file_name, bytes) = match read_image_field(multipart).await {
        Ok(field) => field,
        Err(message) => return malformed(&message),
    };

    let task_state = state.clone();
    let reply = tokio::task::spawn_blocking(move || query::run(&task_state, &file_name, &bytes))
        .await
        .unwrap_or_else(|e| {
            error!("query task failed: {}", e);
            QueryReply {
                uploaded: None,
                result: Err(QueryError::Model(e.to_string())),
            }
        });

    respond(reply)
}

fn respond(reply: QueryReply) -> Response {
    let status = match &reply.result {
        Ok(_) | Err(QueryError::NoFaceDetected) => StatusCode::OK,
        Err(QueryError::MalformedUpload(message)) => return malformed(message),
        Err(QueryError::Io(e)) => {
            error!("query failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            warn!("query failed: {}", e);
            StatusCode::OK
        }
    };
    let html = render::result_page(reply.uploaded.as_deref(), &reply.result);
    (status, Html(html)).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}

pub async fn serve(state: AppState, listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address {}", listen))?;

    for dir in [state.paths.uploads_dir(), state.paths.known_dir()] {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    info!(
        "Serving {} known faces on http://{} (top {})",
        state.store.len(),
        addr,
        state.top_k
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped.");
    Ok(())
}
