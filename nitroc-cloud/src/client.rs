use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Span, debug, field, instrument};

use crate::config::CloudConfig;
use crate::model::StateStore;
use crate::util::http::{Client, ClientError, InvalidUriError, Method, StatusCode, Uri};
use crate::util::types::DeviceToken;

/// State store section reporting the upload activity, e.g. for a status LED
pub const STATUS_SECTION: &str = "things";

#[derive(Debug, Error)]
pub enum PostError {
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid endpoint: {0}")]
    InvalidUri(#[from] InvalidUriError),

    #[error(transparent)]
    Transport(#[from] ClientError),

    #[error("request failed with status code {0}")]
    Status(StatusCode),
}

/// Server side collection a payload is posted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Telemetry,
    Attributes,
    /// Reply to the RPC request with the given id
    Rpc(i64),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Telemetry => f.write_str("telemetry"),
            Endpoint::Attributes => f.write_str("attributes"),
            Endpoint::Rpc(id) => write!(f, "rpc/{id}"),
        }
    }
}

/// Device API client for a ThingsBoard style server
///
/// All endpoints live under `{server}/api/v1/{token}/`, the token is the
/// only credential.
#[derive(Clone)]
pub struct CloudClient {
    server: Uri,
    token: DeviceToken,
    client: Client,
    model: Arc<dyn StateStore>,
}

impl CloudClient {
    pub fn new(config: &CloudConfig, model: Arc<dyn StateStore>) -> Result<Self, ClientError> {
        let client = Client::new(
            Some(config.request.upload_timeout),
            Some(config.request.connect_timeout),
        )?;

        Ok(Self {
            server: config.server.clone(),
            token: config.token.clone(),
            client,
            model,
        })
    }

    /// Build the URI for `{server}/api/v1/{token}/{resource}`
    pub fn uri(&self, resource: &str, query: Option<&str>) -> Result<Uri, InvalidUriError> {
        Uri::from_parts(
            self.server.clone(),
            &format!("/api/v1/{}/{resource}", self.token),
            query,
        )
    }

    /// POST a JSON payload, returns the number of bytes sent
    ///
    /// Only an HTTP 200 response counts as delivered.
    #[instrument(
        level = "debug",
        skip_all,
        fields(endpoint = %endpoint, status = field::Empty),
        err(level = "warn")
    )]
    pub async fn post<T>(&self, endpoint: Endpoint, payload: &T) -> Result<usize, PostError>
    where
        T: Serialize + ?Sized,
    {
        let uri = self.uri(&endpoint.to_string(), None)?;
        let body = serde_json::to_vec(payload)?;
        let len = body.len();

        self.model.publish(STATUS_SECTION, json!({"state": "sending"}));

        let res = self
            .client
            .request(Method::POST, &uri, |req| {
                req.header("Content-Type", "application/json").body(body)
            })
            .await;

        let res = match res {
            Ok(res) => res,
            Err(e) => {
                self.model.publish(STATUS_SECTION, json!({"state": "failed"}));
                return Err(e.into());
            }
        };

        debug!("sent {len} bytes to {}", self.server);
        self.model.publish(STATUS_SECTION, json!({"state": "sent", "bytes": len}));

        let status = res.status();
        Span::current().record("status", status.as_u16());
        if status != StatusCode::OK {
            return Err(PostError::Status(status));
        }

        Ok(len)
    }
}
