//! HTTP server answering vanity import requests.

use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::repo::RepoValidator;
use crate::vanity::{strip_protocol, HtmlGenerator};

/// Server name reported on "/".
pub const SERVER_NAME: &str = "vaingogh-server";

const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";
const TEXT_HTML: &str = "text/html; charset=UTF-8";

/// Errors a request can end with.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid repo")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        (self.status_code(), [(CONTENT_TYPE, TEXT_PLAIN)], self.to_string()).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
}

struct AppState {
    validator: Arc<dyn RepoValidator>,
    generator: Arc<HtmlGenerator>,
    /// Base URL without protocol or surrounding slashes
    base_url: String,
    info: ServerInfo,
}

/// Responds to vanity import URL requests.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(
        validator: Arc<dyn RepoValidator>,
        generator: Arc<HtmlGenerator>,
        base_url: &str,
        environment: Option<String>,
    ) -> Self {
        let base_url = strip_protocol(base_url.trim()).trim_matches('/').to_string();

        Self {
            state: Arc::new(AppState {
                validator,
                generator,
                base_url,
                info: ServerInfo {
                    name: SERVER_NAME,
                    version: env!("CARGO_PKG_VERSION"),
                    environment,
                },
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(server_info))
            .fallback(vanity_page)
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on `listener` until `shutdown` completes, then drain in-flight
    /// requests.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Listening for connections");
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }
}

async fn server_info(State(state): State<Arc<AppState>>) -> Json<ServerInfo> {
    Json(state.info.clone())
}

async fn vanity_page(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ServerError> {
    let path = uri.path();
    let Some(partial) = partial_name(&state.base_url, path) else {
        debug!(path = %path, "Request path has no repository segment");
        return Err(ServerError::NotFound);
    };

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_else(|| base_host(&state.base_url));
    let address = format!("{}{}", host, path);
    let prefix = format!("{}/{}", state.base_url, partial);
    let repo = state.validator.derive_full_name(partial);

    let valid = state.validator.is_valid(&repo).map_err(|e| {
        error!(repo = %repo, "Failure while checking repo validity: {}", e);
        ServerError::Internal(format!("checking repo validity: {}", e))
    })?;
    if !valid {
        debug!(repo = %repo, "Repository is not served");
        return Err(ServerError::NotFound);
    }

    let html = state
        .generator
        .generate(&prefix, &address, &repo)
        .map_err(|e| {
            error!(repo = %repo, "Failed to generate page: {}", e);
            ServerError::Internal(format!("generating HTML page: {}", e))
        })?;

    Ok(([(CONTENT_TYPE, TEXT_HTML)], html).into_response())
}

/// First path segment after the base URL's own path, if any.
fn partial_name<'a>(base_url: &str, path: &'a str) -> Option<&'a str> {
    let base_path = base_url.split_once('/').map(|(_, p)| p).unwrap_or("");
    let rest = path.trim_start_matches('/');
    let rest = if base_path.is_empty() {
        rest
    } else {
        rest.strip_prefix(base_path)?
            .strip_prefix('/')
            .unwrap_or("")
    };

    rest.split('/').next().filter(|segment| !segment.is_empty())
}

fn base_host(base_url: &str) -> &str {
    base_url.split('/').next().unwrap_or(base_url)
}
