use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, instrument, trace, warn};

use crate::client::{CloudClient, Endpoint};
use crate::config::RequestConfig;
use crate::util::http::{Client, ClientError, InvalidUriError, Method, StatusCode, Uri};

mod handler;
pub mod led;
pub mod system;

pub use handler::{RegistryError, RpcHandler, RpcRegistry};

/// How long to wait for a control message before the first start
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// How long to wait for a control message after a stop
const STOPPED_WAIT: Duration = Duration::from_secs(5);

/// Delays between failed session or poll attempts
const MIN_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Listener control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcControl {
    Start,
    Stop,
}

/// Body of an RPC request, the `id` is read separately
#[derive(Deserialize, Debug)]
struct RpcRequest {
    method: String,
    params: Value,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid endpoint: {0}")]
    InvalidUri(#[from] InvalidUriError),

    #[error(transparent)]
    Transport(#[from] ClientError),

    #[error("request failed with status code {0}")]
    Status(StatusCode),
}

/// A long-poll session against the RPC endpoint
struct RpcSession {
    client: Client,
    uri: Uri,
}

impl RpcSession {
    /// Wait for the next request
    ///
    /// Returns `None` if the poll ended without a request.
    async fn poll(&self) -> Result<Option<Value>, PollError> {
        let res = match self
            .client
            .request(Method::GET, &self.uri, |req| {
                req.header("Content-Type", "application/json")
            })
            .await
        {
            Ok(res) => res,
            Err(e) if e.is_timeout() => {
                debug!("RPC poll timed out");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match res.status() {
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                debug!("no RPC request ({})", res.status());
                Ok(None)
            }
            status if status.is_success() => Ok(Some(res.json().await?)),
            status => Err(PollError::Status(status)),
        }
    }
}

/// Receives RPC requests from the server and acknowledges them
pub struct RpcListener {
    cloud: CloudClient,
    registry: Arc<RpcRegistry>,
    config: RequestConfig,
}

impl RpcListener {
    pub fn new(cloud: CloudClient, registry: Arc<RpcRegistry>, config: RequestConfig) -> Self {
        Self {
            cloud,
            registry,
            config,
        }
    }

    fn open_session(&self) -> Result<RpcSession, PollError> {
        let timeout = self.config.rpc_timeout;
        let query = format!("timeout={}", timeout.as_millis());
        let uri = self.cloud.uri("rpc", Some(&query))?;
        let client = Client::new(Some(timeout), Some(self.config.connect_timeout))?;
        Ok(RpcSession { client, uri })
    }

    /// Run the requested procedure and post the result back
    ///
    /// Every request carrying an integer `id` is answered, with
    /// `{"result": "error"}` if the request is malformed, no handler exists
    /// for the method or the handler fails. Requests without an `id` cannot
    /// be answered and are dropped. Returns the handler result or `None`
    /// if the request was dropped.
    pub async fn dispatch(&self, body: Value) -> Option<bool> {
        let Some(id) = body.get("id").and_then(Value::as_i64) else {
            info!("discarding RPC request without id: {body}");
            return None;
        };

        let success = match serde_json::from_value::<RpcRequest>(body) {
            Ok(RpcRequest { method, params }) => {
                info!("calling RPC {method} with {params}");
                self.registry.run(&method, &params).unwrap_or_else(|| {
                    info!("unsupported RPC method {method}");
                    false
                })
            }
            Err(e) => {
                info!("illegal RPC request format: {e}");
                false
            }
        };

        let reply = json!({"result": if success { "ok" } else { "error" }});
        if let Err(e) = self.cloud.post(Endpoint::Rpc(id), &reply).await {
            warn!("failed to acknowledge RPC request {id}: {e}");
        }

        Some(success)
    }
}

/// Exponential delay between failed attempts
#[derive(Debug)]
struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: MIN_ERROR_BACKOFF,
        }
    }
}

impl Backoff {
    fn reset(&mut self) {
        self.current = MIN_ERROR_BACKOFF;
    }

    /// Return the delay to apply now and double it for the next failure
    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_ERROR_BACKOFF);
        delay
    }
}

impl RpcListener {
    /// Open a session if there is none yet and poll it once
    ///
    /// Returns how long to wait for control messages before the next poll.
    async fn step(&self, session: &mut Option<RpcSession>, backoff: &mut Backoff) -> Duration {
        let current = match session.take() {
            Some(current) => current,
            None => match self.open_session() {
                Ok(current) => {
                    info!("listening for RPC requests");
                    current
                }
                Err(e) => {
                    warn!("failed to open RPC session: {e}");
                    return backoff.next();
                }
            },
        };

        let wait = match current.poll().await {
            Ok(Some(body)) => {
                info!("RPC request received: {body}");
                self.dispatch(body).await;
                backoff.reset();
                Duration::ZERO
            }
            Ok(None) => {
                backoff.reset();
                Duration::ZERO
            }
            Err(e) => {
                warn!("RPC poll failed: {e}");
                backoff.next()
            }
        };

        *session = Some(current);
        wait
    }
}

/// Long-poll the server for RPC requests while started
///
/// The task is idle until it receives [RpcControl::Start] and returns to
/// idle on [RpcControl::Stop]. It ends when the control channel closes.
#[instrument(name = "rpc", skip_all)]
pub async fn start_rpc(listener: RpcListener, mut control_rx: mpsc::UnboundedReceiver<RpcControl>) {
    debug!(
        "ready to serve {} RPC method(s)",
        listener.registry.methods().count()
    );

    let mut wait = IDLE_WAIT;
    let mut backoff = Backoff::default();
    let mut started = false;
    let mut session = None;
    loop {
        match time::timeout(wait, control_rx.recv()).await {
            Ok(Some(RpcControl::Start)) => {
                started = true;
                backoff.reset();
            }
            Ok(Some(RpcControl::Stop)) => {
                started = false;
                if session.take().is_some() {
                    info!("stopped listening for RPC requests");
                }
                wait = STOPPED_WAIT;
            }
            Ok(None) => break,
            // no control message
            Err(_) => {}
        }

        if started {
            wait = listener.step(&mut session, &mut backoff).await;
        }
    }
    trace!("control channel closed");
}
