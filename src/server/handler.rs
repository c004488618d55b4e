// Axum front end: turns incoming HTTP requests into fetch events on the controller.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use reqwest::Url;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::CACHE_STATUS_HEADER;
use crate::engine::interceptor::ResponseSource;
use crate::error::{CacheError, CacheResult};
use crate::lifecycle::{CacheWorker, LifecycleController};
use crate::model::{CacheRequest, CachedResponse};

pub type Controller = Arc<LifecycleController<CacheWorker>>;

/// Request headers that never reach the network.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "transfer-encoding",
    "content-length",
    "upgrade",
    // Partial responses are never cached, so ranges are not forwarded.
    "range",
    "if-range",
];

/// Response headers recomputed by the server.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

#[derive(Clone)]
struct ServerState {
    controller: Controller,
    scope: Url,
}

pub struct CacheServer {
    port: u16,
    controller: Controller,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl CacheServer {
    /// Bind `listen_addr` and serve every request through `controller`.
    pub async fn start(controller: Controller, scope: Url, listen_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = Router::new()
            .fallback(intercept_handler)
            .with_state(ServerState {
                controller: Arc::clone(&controller),
                scope,
            });

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        info!("cache server listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            controller,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Local URL for `path` on this server.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "http://127.0.0.1:{}/{}",
            self.port,
            path.trim_start_matches('/')
        )
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Absolute-form request targets are used as-is; origin-form paths resolve against the scope.
fn target_url(scope: &Url, uri: &Uri) -> CacheResult<Url> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        let raw = uri.to_string();
        return Url::parse(&raw).map_err(|e| CacheError::InvalidUrl {
            url: raw,
            reason: e.to_string(),
        });
    }
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    scope.join(path).map_err(|e| CacheError::InvalidUrl {
        url: path.to_string(),
        reason: e.to_string(),
    })
}

fn build_request(method: &Method, url: Url, headers: &HeaderMap) -> CacheRequest {
    let mut request = CacheRequest::new(method.as_str(), url);
    for (name, value) in headers {
        if SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request
}

fn into_http_response(response: CachedResponse, source: ResponseSource) -> Response {
    // Opaque responses carry no readable status; relay their body as a plain 200.
    let status = if response.is_opaque() {
        StatusCode::OK
    } else {
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY)
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|s| name.eq_ignore_ascii_case(s))
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(source.as_str()),
    );

    (status, headers, Body::from(response.body)).into_response()
}

async fn intercept_handler(
    State(state): State<ServerState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
            "only GET and HEAD are intercepted",
        )
            .into_response();
    }

    let url = match target_url(&state.scope, &uri) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("error: {}", e)).into_response(),
    };
    let request = build_request(&method, url, &headers);

    match state.controller.fetch(&request).await {
        Ok(interception) => {
            debug!(
                "served {} {} source={}",
                request.method,
                request.url,
                interception.source.as_str()
            );
            into_http_response(interception.response, interception.source)
        }
        Err(e) => {
            error!("intercept error for {}: {}", request.url, e);
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, format!("error: {}", e)).into_response()
        }
    }
}
