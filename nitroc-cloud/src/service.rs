use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, trace};

use crate::client::CloudClient;
use crate::collect::{DataCollector, start_collect};
use crate::config::CloudConfig;
use crate::model::StateStore;
use crate::queue::TransmitQueue;
use crate::rpc::{RpcListener, RpcRegistry, start_rpc};
use crate::upload::{Uploader, start_upload};
use crate::util::http::ClientError;

/// State store section holding the cloud activity flag
pub const CLOUD_SECTION: &str = "cloud";

/// Telemetry records kept while the server is unreachable, about 10
/// minutes worth of data at the default sampling periods
pub const TELEMETRY_QUEUE_SIZE: usize = 600;

/// Only the most recent attribute set is of interest
pub const ATTRIBUTES_QUEUE_SIZE: usize = 1;

/// Outcome of an enable or disable request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableStatus {
    Started,
    AlreadyRunning,
    NoConfiguration,
    Stopped,
    NotRunning,
}

impl fmt::Display for EnableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            EnableStatus::Started => "Started cloud logger",
            EnableStatus::AlreadyRunning => "Cloud logger already running",
            EnableStatus::NoConfiguration => "Cannot start. No configuration present",
            EnableStatus::Stopped => "Stopped cloud logger",
            EnableStatus::NotRunning => "Cloud logger not running",
        };
        f.write_str(msg)
    }
}

/// Switches the cloud subsystem on and off
///
/// Cloning the service yields another handle to the same activity flag.
#[derive(Clone)]
pub struct CloudService {
    configured: bool,
    active_tx: Arc<watch::Sender<bool>>,
    model: Arc<dyn StateStore>,
}

impl CloudService {
    pub fn new(configured: bool, model: Arc<dyn StateStore>) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            configured,
            active_tx: Arc::new(active_tx),
            model,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        *self.active_tx.borrow()
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn enable(&self, enable: bool) -> EnableStatus {
        let status = if enable {
            if !self.configured {
                EnableStatus::NoConfiguration
            } else if self.active_tx.send_if_modified(|active| !std::mem::replace(active, true)) {
                EnableStatus::Started
            } else {
                EnableStatus::AlreadyRunning
            }
        } else if self.active_tx.send_if_modified(|active| std::mem::replace(active, false)) {
            EnableStatus::Stopped
        } else {
            EnableStatus::NotRunning
        };

        info!("{status}");
        self.model.publish(CLOUD_SECTION, Value::Bool(self.is_active()));

        status
    }
}

/// Run the collector, uploader and RPC listener until the activity
/// channel closes
#[instrument(name = "cloud", skip_all, err)]
pub async fn start_cloud(
    config: CloudConfig,
    model: Arc<dyn StateStore>,
    registry: RpcRegistry,
    active_rx: watch::Receiver<bool>,
) -> Result<(), ClientError> {
    trace!(server = %config.server, "using config");

    let attributes = Arc::new(TransmitQueue::new(ATTRIBUTES_QUEUE_SIZE));
    let telemetry = Arc::new(TransmitQueue::new(TELEMETRY_QUEUE_SIZE));
    let cloud = CloudClient::new(&config, Arc::clone(&model))?;
    let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();

    let collector = DataCollector::new(Arc::clone(&attributes), Arc::clone(&telemetry));
    let uploader = Uploader::new(Arc::clone(&model), cloud.clone(), attributes, telemetry, rpc_tx);
    let listener = RpcListener::new(cloud, Arc::new(registry), config.request);

    tokio::join!(
        start_collect(collector, model, active_rx.clone()),
        start_upload(uploader, active_rx),
        start_rpc(listener, rpc_rx),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    use super::*;
    use crate::config::RequestConfig;
    use crate::model::Model;
    use crate::util::types::DeviceToken;

    #[test]
    fn it_reports_the_enable_status() {
        let model = Arc::new(Model::new());
        let service = CloudService::new(true, model.clone());

        assert_eq!(service.enable(false), EnableStatus::NotRunning);
        assert_eq!(model.get_section(CLOUD_SECTION), Some(json!(false)));

        assert_eq!(service.enable(true), EnableStatus::Started);
        assert!(service.is_active());
        assert_eq!(model.get_section(CLOUD_SECTION), Some(json!(true)));

        assert_eq!(service.enable(true), EnableStatus::AlreadyRunning);
        assert_eq!(service.enable(false), EnableStatus::Stopped);
        assert!(!service.is_active());
        assert_eq!(model.get_section(CLOUD_SECTION), Some(json!(false)));
    }

    #[test]
    fn it_cannot_start_without_configuration() {
        let model = Arc::new(Model::new());
        let service = CloudService::new(false, model.clone());

        assert_eq!(service.enable(true), EnableStatus::NoConfiguration);
        assert!(!service.is_active());
        assert_eq!(model.get_section(CLOUD_SECTION), Some(json!(false)));
        assert_eq!(
            EnableStatus::NoConfiguration.to_string(),
            "Cannot start. No configuration present"
        );
    }

    #[test]
    fn handles_share_the_activity_flag() {
        let service = CloudService::new(true, Arc::new(Model::new()));
        let other = service.clone();
        let rx = service.subscribe();

        other.enable(true);
        assert!(service.is_active());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn it_uploads_collected_data_once_connected() {
        let mut server = Server::new_async().await;
        let attributes = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/attributes")
            .match_body(Matcher::PartialJson(json!({"serial": "NG800-1"})))
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/A1_TEST_TOKEN/rpc")
            .match_query(Matcher::Any)
            .with_status(408)
            .create_async()
            .await;

        let model: Arc<dyn StateStore> = Arc::new(Model::new());
        model.publish("network", json!({"inet-conn": "full"}));
        model.publish("sys-version", json!({"serial": "NG800-1"}));

        let config = CloudConfig {
            server: server.url().parse().unwrap(),
            token: DeviceToken::from("A1_TEST_TOKEN"),
            request: RequestConfig::default(),
        };
        let service = CloudService::new(true, Arc::clone(&model));
        let active_rx = service.subscribe();
        assert_eq!(service.enable(true), EnableStatus::Started);

        let handle = tokio::spawn(start_cloud(
            config,
            Arc::clone(&model),
            RpcRegistry::new(),
            active_rx,
        ));

        // collect at t=0, connect at t=0, upload at t=1
        tokio::time::sleep(Duration::from_millis(1500)).await;
        attributes.assert_async().await;

        handle.abort();
    }
}
