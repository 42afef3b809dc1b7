//! HTTP command surface.
//!
//! | Route | Controller call |
//! |---|---|
//! | `GET /status` | [`Controller::status`] |
//! | `PUT /toggle` | [`Controller::toggle`] |
//! | `PUT /set` | [`Controller::set`] |
//! | `GET /health` | [`Controller::health`] |
//! | `PUT /effects/{rainbow,pulse,chase,wipe}` | [`Controller::run_effect`] |
//! | `PUT /off` | [`Controller::off`] |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

use super::{API_KEY_HEADER, MAX_BODY_BYTES};
use crate::controller::{Controller, EffectKind, EffectRequest, ErrorReply, HealthReply};
use crate::error::{BlinkyError, Result};
use crate::state::DeviceState;

/// How long a connection may sit without sending a complete request heading.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

struct AppState {
    controller: Arc<Controller>,
    api_key: Option<String>,
}

type Shared = Arc<AppState>;

pub struct HttpServer {
    state: Shared,
    idle_timeout: Duration,
}

impl HttpServer {
    /// With `api_key` set, every route except `/health` requires a matching `X-Api-Key`.
    pub fn new(controller: Arc<Controller>, api_key: Option<&str>) -> Self {
        Self {
            state: Arc::new(AppState {
                controller,
                api_key: api_key.map(str::to_string),
            }),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The routes with CORS, body limit and API key checks applied.
    pub fn router(&self) -> Router {
        let protected = Router::new()
            .route("/status", get(status))
            .route("/toggle", put(toggle))
            .route("/set", put(set))
            .route("/off", put(off))
            .route("/effects/{kind}", put(effect))
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.state),
                require_api_key,
            ));

        Router::new()
            .route("/health", get(health))
            .merge(protected)
            .fallback(not_found)
            .layer(middleware::from_fn(log_request))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(cors())
            .with_state(Arc::clone(&self.state))
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        log::info!("HTTP server listening on {}", listener.local_addr()?);
        let router = self.router();
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    log::warn!("http: accept failed: {e}");
                    continue;
                }
            };
            let router = router.clone();
            let idle_timeout = self.idle_timeout;
            tokio::spawn(async move {
                serve_connection(stream, peer, router, idle_timeout).await;
            });
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, router: Router, idle: Duration) {
    // Drop peers that connect and never speak.
    let mut first = [0u8; 1];
    match tokio::time::timeout(idle, stream.peek(&mut first)).await {
        Ok(Ok(0)) => return,
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            log::debug!("http: connection from {peer}: {e}");
            return;
        }
        Err(_) => {
            log::debug!("http: closing idle connection from {peer}");
            return;
        }
    }

    let mut builder = http1::Builder::new();
    builder.timer(TokioTimer::new()).header_read_timeout(idle);
    let service = TowerToHyperService::new(router);
    if let Err(e) = builder
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        log::debug!("http: connection from {peer}: {e}");
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ])
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorReply::new(message))).into_response()
}

fn error_status(e: &BlinkyError) -> StatusCode {
    match e {
        BlinkyError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn log_request(request: Request, next: Next) -> Response {
    log::info!("{} {}", request.method(), request.uri().path());
    next.run(request).await
}

async fn require_api_key(State(app): State<Shared>, request: Request, next: Next) -> Response {
    if let Some(key) = &app.api_key {
        let given = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(key.as_str()) {
            log::warn!(
                "http: rejected {} {}: bad or missing API key",
                request.method(),
                request.uri().path()
            );
            return error_response(StatusCode::FORBIDDEN, "Forbidden");
        }
    }
    next.run(request).await
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn status(State(app): State<Shared>) -> Json<DeviceState> {
    Json(app.controller.status())
}

async fn health(State(app): State<Shared>) -> Json<HealthReply> {
    Json(app.controller.health())
}

async fn toggle(State(app): State<Shared>) -> Response {
    blocking(&app, |c| Ok(c.toggle())).await
}

async fn off(State(app): State<Shared>) -> Response {
    blocking(&app, |c| Ok(c.off())).await
}

async fn set(State(app): State<Shared>, body: Bytes) -> Response {
    blocking(&app, move |c| c.set(Some(&body[..]))).await
}

async fn effect(State(app): State<Shared>, Path(name): Path<String>, body: Bytes) -> Response {
    let Some(kind) = EffectKind::from_name(&name).filter(|k| *k != EffectKind::Off) else {
        return not_found().await;
    };
    // The rainbow takes no parameters; whatever the body holds is ignored.
    let request = if kind == EffectKind::Rainbow {
        EffectRequest::new(kind)
    } else {
        match EffectRequest::from_body(kind, Some(&body[..])) {
            Ok(r) => r,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.client_message()),
        }
    };
    blocking(&app, move |c| c.run_effect(&request)).await
}

/// Run a controller call on the blocking pool and encode its reply.
async fn blocking<T, F>(app: &AppState, f: F) -> Response
where
    T: Serialize + Send + 'static,
    F: FnOnce(&Controller) -> Result<T> + Send + 'static,
{
    let controller = Arc::clone(&app.controller);
    match tokio::task::spawn_blocking(move || f(&controller)).await {
        Ok(Ok(reply)) => Json(reply).into_response(),
        Ok(Err(e)) => {
            log::warn!("http: {e}");
            error_response(error_status(&e), e.client_message())
        }
        Err(e) => {
            log::error!("http: command task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
