use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{Request, Response, StatusCode},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};
use std::io;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UnixListener};
use tower_http::trace::TraceLayer;
use tracing::{
    Span, debug_span,
    field::{Empty, display},
    info, instrument,
};

use nitroc_cloud::CloudService;
use nitroc_model::{Snapshot, StateStore};

pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Local API listen address
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum LocalAddress {
    Tcp(SocketAddr),
    Unix(path::PathBuf),
}

/// Local API configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiConfig {
    pub local_address: LocalAddress,
}

impl Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalAddress::Tcp(socket_addr) => socket_addr.fmt(f),
            LocalAddress::Unix(path) => path.as_path().display().fmt(f),
        }
    }
}

impl FromStr for LocalAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(LocalAddress::Tcp)
            .or_else(|_| Ok(LocalAddress::Unix(path::Path::new(s).to_path_buf())))
    }
}

impl Default for LocalAddress {
    fn default() -> Self {
        LocalAddress::Tcp(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            48480,
        ))
    }
}

impl LocalAddress {
    pub async fn bind(&self) -> io::Result<Listener> {
        match self {
            LocalAddress::Tcp(socket_addr) => {
                Ok(Listener::Tcp(TcpListener::bind(socket_addr).await?))
            }
            LocalAddress::Unix(path) => Ok(Listener::Unix(UnixListener::bind(path)?)),
        }
    }
}

#[derive(Clone)]
struct ApiState {
    cloud: CloudService,
    model: Arc<dyn StateStore>,
}

#[derive(Serialize, Debug)]
struct CloudStatus {
    active: bool,
    configured: bool,
}

#[derive(Deserialize, Debug)]
struct EnableOpts {
    enable: bool,
}

/// Start the API
///
/// Receives a listener already bound to the right address, the cloud
/// service handle and the state store to expose.
#[instrument(name = "api", skip_all, err)]
pub async fn start(
    listener: Listener,
    cloud: CloudService,
    model: Arc<dyn StateStore>,
) -> io::Result<()> {
    let api_span = Span::current();
    let app = Router::new()
        .route("/v1/ping", get(|| async { "OK" }))
        .route("/v1/cloud", get(cloud_status).post(enable_cloud))
        .route("/v1/model", get(get_model))
        .route("/v1/model/{section}", get(get_section).post(publish_section));

    // Enable tracing
    let app = app.layer(
        TraceLayer::new_for_http()
            .make_span_with(move |request: &Request<Body>| {
                debug_span!(parent: &api_span, "request",
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    status = Empty,
                )
            })
            .on_response(|response: &Response<Body>, _: Duration, span: &Span| {
                span.record("status", display(response.status()));
            }),
    );

    let app = app.with_state(ApiState { cloud, model });

    info!("ready");

    match listener {
        Listener::Tcp(listener) => axum::serve(listener, app).await,
        Listener::Unix(listener) => axum::serve(listener, app).await,
    }
}

/// Handle `GET /v1/cloud`
async fn cloud_status(State(state): State<ApiState>) -> Json<CloudStatus> {
    Json(CloudStatus {
        active: state.cloud.is_active(),
        configured: state.cloud.is_configured(),
    })
}

/// Handle `POST /v1/cloud?enable=<bool>`
///
/// Responds with a human readable outcome
async fn enable_cloud(
    State(state): State<ApiState>,
    Query(opts): Query<EnableOpts>,
) -> String {
    state.cloud.enable(opts.enable).to_string()
}

/// Handle `GET /v1/model`
async fn get_model(State(state): State<ApiState>) -> Json<Snapshot> {
    Json(state.model.get_all())
}

/// Handle `GET /v1/model/{section}`
async fn get_section(
    State(state): State<ApiState>,
    Path(section): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    state
        .model
        .get_section(&section)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Handle `POST /v1/model/{section}`
///
/// Replaces the section with the request body. This is how collectors
/// outside of this process feed the state store.
async fn publish_section(
    State(state): State<ApiState>,
    Path(section): Path<String>,
    Json(value): Json<Value>,
) -> StatusCode {
    state.model.publish(&section, value);
    StatusCode::ACCEPTED
}
