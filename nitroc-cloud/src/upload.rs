use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::client::{CloudClient, Endpoint, PostError};
use crate::model::sections::{ModemInfo, NetworkInfo};
use crate::model::{Snapshot, StateStore};
use crate::queue::TransmitQueue;
use crate::record::{Attributes, QueueSize, Telemetry, TelemetryEntry};
use crate::rpc::RpcControl;

pub const UPLOAD_PERIOD: Duration = Duration::from_secs(1);

/// Telemetry is uploaded on ticks where `counter % 15 == 5`
const TELEMETRY_UPLOAD_EVERY: u64 = 15;
const TELEMETRY_UPLOAD_OFFSET: u64 = 5;

/// Maximum number of telemetry records per upload
pub const TELEMETRY_BATCH_SIZE: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkState {
    /// Waiting for internet connectivity
    Init,
    Connected,
}

/// Whether the device can currently reach the internet
///
/// The network manager's view wins. Without one, an IPv4 bearer address
/// on the modem is taken as a sign of connectivity.
pub fn has_connectivity(snapshot: &Snapshot) -> bool {
    if let Some(network) = snapshot.section::<NetworkInfo>("network") {
        return network.inet_conn.as_deref() == Some("full");
    }

    snapshot
        .section::<ModemInfo>("modem")
        .and_then(|modem| modem.bearer_ip)
        .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
        .is_some_and(|ip| {
            !(ip.is_unspecified() || ip.is_loopback() || ip.is_link_local() || ip.is_broadcast())
        })
}

/// Drains the transmit queues to the server while connected
pub struct Uploader {
    model: Arc<dyn StateStore>,
    cloud: CloudClient,
    attributes: Arc<TransmitQueue<Attributes>>,
    telemetry: Arc<TransmitQueue<Telemetry>>,
    rpc_tx: mpsc::UnboundedSender<RpcControl>,
    state: UplinkState,
    counter: u64,
}

impl Uploader {
    pub fn new(
        model: Arc<dyn StateStore>,
        cloud: CloudClient,
        attributes: Arc<TransmitQueue<Attributes>>,
        telemetry: Arc<TransmitQueue<Telemetry>>,
        rpc_tx: mpsc::UnboundedSender<RpcControl>,
    ) -> Self {
        Self {
            model,
            cloud,
            attributes,
            telemetry,
            rpc_tx,
            state: UplinkState::Init,
            counter: 0,
        }
    }

    pub fn state(&self) -> UplinkState {
        self.state
    }

    fn control_rpc(&self, msg: RpcControl) {
        if self.rpc_tx.send(msg).is_err() {
            warn!("RPC listener is gone, cannot send {msg:?}");
        }
    }

    fn set_state(&mut self, next: UplinkState) {
        if self.state != next {
            info!("changed state from {:?} to {:?}", self.state, next);
            self.state = next;
        }
    }

    pub async fn tick(&mut self) {
        let connected = has_connectivity(&self.model.get_all());

        match self.state {
            UplinkState::Init if connected => {
                info!("internet connectivity established");
                self.control_rpc(RpcControl::Start);
                self.counter = 0;
                self.set_state(UplinkState::Connected);
            }
            UplinkState::Init => {}
            UplinkState::Connected if !connected => {
                warn!("lost internet connectivity");
                self.control_rpc(RpcControl::Stop);
                self.set_state(UplinkState::Init);
            }
            UplinkState::Connected => {
                // failures are logged, records stay queued for the next try
                let _ = self.upload_attributes().await;

                if self.counter % TELEMETRY_UPLOAD_EVERY == TELEMETRY_UPLOAD_OFFSET {
                    let _ = self.upload_telemetry().await;
                }
            }
        }

        self.counter += 1;
    }

    /// Return to [UplinkState::Init] and stop the RPC listener if needed
    pub fn reset(&mut self) {
        if self.state == UplinkState::Connected {
            self.control_rpc(RpcControl::Stop);
        }
        self.set_state(UplinkState::Init);
        self.counter = 0;
    }

    /// Upload the oldest queued attribute record
    ///
    /// Returns the number of records delivered.
    pub async fn upload_attributes(&self) -> Result<usize, PostError> {
        let Some(record) = self.attributes.first_entries(1).pop() else {
            return Ok(0);
        };

        match self.cloud.post(Endpoint::Attributes, &record.payload).await {
            Ok(_) => {
                self.attributes.remove_first(1);
                Ok(1)
            }
            Err(e) => {
                warn!("could not upload attributes, keeping them in queue");
                Err(e)
            }
        }
    }

    /// Upload a batch of the oldest queued telemetry records
    ///
    /// The current backlog size is queued as a record of its own first, so
    /// the server can observe upload lag. Records are only removed from the
    /// queue once the server accepted the whole batch.
    ///
    /// Returns the number of records delivered.
    pub async fn upload_telemetry(&self) -> Result<usize, PostError> {
        let entries = self.telemetry.num_entries();
        if entries == 0 {
            return Ok(0);
        }

        self.telemetry.add(QueueSize { entries }.into());

        let batch = self.telemetry.first_entries(TELEMETRY_BATCH_SIZE);
        let payload: Vec<TelemetryEntry> = batch.iter().map(TelemetryEntry::from).collect();

        match self.cloud.post(Endpoint::Telemetry, &payload).await {
            Ok(_) => {
                self.telemetry.remove_first(batch.len());
                debug!("removed {} records from queue", batch.len());
                Ok(batch.len())
            }
            Err(e) => {
                warn!(
                    "could not upload telemetry, keeping {} records in queue",
                    self.telemetry.num_entries()
                );
                Err(e)
            }
        }
    }
}

/// Drive the uploader while the cloud service is active
#[instrument(name = "upload", skip_all)]
pub async fn start_upload(mut uploader: Uploader, mut active_rx: watch::Receiver<bool>) {
    info!("uploader ready");

    let mut interval = time::interval(UPLOAD_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;

        if active_rx.has_changed().is_err() {
            break;
        }

        if *active_rx.borrow_and_update() {
            uploader.tick().await;
        } else {
            uploader.reset();
        }
    }
    trace!("activity channel closed");
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::{CloudConfig, RequestConfig};
    use crate::model::Model;
    use crate::record::InfoTelemetry;
    use crate::util::types::DeviceToken;

    struct Harness {
        model: Arc<Model>,
        attributes: Arc<TransmitQueue<Attributes>>,
        telemetry: Arc<TransmitQueue<Telemetry>>,
        rpc_rx: mpsc::UnboundedReceiver<RpcControl>,
        uploader: Uploader,
    }

    fn harness(server: &Server) -> Harness {
        let model = Arc::new(Model::new());
        let config = CloudConfig {
            server: server.url().parse().unwrap(),
            token: DeviceToken::from("A1_TEST_TOKEN"),
            request: RequestConfig::default(),
        };
        let cloud = CloudClient::new(&config, model.clone()).unwrap();
        let attributes = Arc::new(TransmitQueue::new(1));
        let telemetry = Arc::new(TransmitQueue::new(600));
        let (rpc_tx, rpc_rx) = mpsc::unbounded_channel();
        let uploader = Uploader::new(
            model.clone(),
            cloud,
            attributes.clone(),
            telemetry.clone(),
            rpc_tx,
        );

        Harness {
            model,
            attributes,
            telemetry,
            rpc_rx,
            uploader,
        }
    }

    fn info(load: f64) -> Telemetry {
        InfoTelemetry {
            cpu_load: Some(load),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn it_detects_connectivity() {
        let full = Snapshot::from(json!({"network": {"inet-conn": "full"}}));
        assert!(has_connectivity(&full));

        let limited = Snapshot::from(json!({
            "network": {"inet-conn": "limited"},
            "modem": {"bearer-ip": "10.1.2.3"}
        }));
        assert!(!has_connectivity(&limited));

        let bearer = Snapshot::from(json!({"modem": {"bearer-ip": "10.1.2.3"}}));
        assert!(has_connectivity(&bearer));

        let no_bearer = Snapshot::from(json!({"modem": {"bearer-ip": "0.0.0.0"}}));
        assert!(!has_connectivity(&no_bearer));

        assert!(!has_connectivity(&Snapshot::default()));
    }

    #[tokio::test]
    async fn it_connects_and_starts_the_rpc_listener() {
        let server = Server::new_async().await;
        let mut h = harness(&server);

        h.uploader.tick().await;
        assert_eq!(h.uploader.state(), UplinkState::Init);
        assert!(h.rpc_rx.try_recv().is_err());

        h.model.publish("network", json!({"inet-conn": "full"}));
        h.uploader.tick().await;
        assert_eq!(h.uploader.state(), UplinkState::Connected);
        assert_eq!(h.rpc_rx.try_recv().unwrap(), RpcControl::Start);
    }

    #[tokio::test]
    async fn losing_connectivity_stops_the_rpc_listener() {
        let server = Server::new_async().await;
        let mut h = harness(&server);

        h.model.publish("network", json!({"inet-conn": "full"}));
        h.uploader.tick().await;
        assert_eq!(h.rpc_rx.try_recv().unwrap(), RpcControl::Start);

        h.model.publish("network", json!({"inet-conn": "none"}));
        h.uploader.tick().await;
        assert_eq!(h.uploader.state(), UplinkState::Init);
        assert_eq!(h.rpc_rx.try_recv().unwrap(), RpcControl::Stop);
    }

    #[tokio::test]
    async fn reset_stops_the_rpc_listener_once() {
        let server = Server::new_async().await;
        let mut h = harness(&server);

        h.model.publish("network", json!({"inet-conn": "full"}));
        h.uploader.tick().await;
        assert_eq!(h.rpc_rx.try_recv().unwrap(), RpcControl::Start);

        h.uploader.reset();
        h.uploader.reset();
        assert_eq!(h.uploader.state(), UplinkState::Init);
        assert_eq!(h.rpc_rx.try_recv().unwrap(), RpcControl::Stop);
        assert!(h.rpc_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn it_uploads_attributes_every_tick_and_telemetry_on_schedule() {
        let mut server = Server::new_async().await;
        let attributes = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/attributes")
            .match_body(Matcher::Json(json!({"serial": "NG800-1", "ui-version": "0.1.0"})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let telemetry = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/telemetry")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut h = harness(&server);
        h.model.publish("network", json!({"inet-conn": "full"}));
        h.attributes.add(Attributes {
            serial: Some("NG800-1".to_owned()),
            ui_version: "0.1.0".to_owned(),
            ..Default::default()
        });
        h.telemetry.add(info(0.1));

        // connect, counter 0
        h.uploader.tick().await;
        assert_eq!(h.attributes.num_entries(), 1);

        // counter 1..4, attributes go out right away
        for _ in 1..5 {
            h.uploader.tick().await;
        }
        assert_eq!(h.attributes.num_entries(), 0);
        assert_eq!(h.telemetry.num_entries(), 1);

        // counter 5
        h.uploader.tick().await;
        assert_eq!(h.telemetry.num_entries(), 0);

        attributes.assert_async().await;
        telemetry.assert_async().await;
    }

    #[tokio::test]
    async fn failed_uploads_keep_the_records() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/telemetry")
            .with_status(500)
            .create_async()
            .await;

        let h = harness(&server);
        for i in 0..3 {
            h.telemetry.add(info(i as f64));
        }

        let res = h.uploader.upload_telemetry().await;
        assert!(matches!(res, Err(PostError::Status(_))));
        // the backlog record was added
        assert_eq!(h.telemetry.num_entries(), 4);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn successful_uploads_remove_exactly_the_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/telemetry")
            .with_status(200)
            .create_async()
            .await;

        let h = harness(&server);
        for i in 0..130 {
            h.telemetry.add(info(i as f64));
        }

        let sent = h.uploader.upload_telemetry().await.unwrap();
        assert_eq!(sent, TELEMETRY_BATCH_SIZE);
        // 130 records plus the backlog record, minus one batch
        assert_eq!(h.telemetry.num_entries(), 11);

        let last = h.telemetry.all_entries().pop().unwrap();
        assert_eq!(
            last.payload,
            Telemetry::QueueSize(QueueSize { entries: 130 })
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn uploads_use_the_ts_values_wire_format() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/A1_TEST_TOKEN/telemetry")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#"^\[\{"ts":\d+,"values":\{"cpu-load":0\.5\}\}"#.to_owned()),
                Matcher::Regex(r#"\{"ts":\d+,"values":\{"tb-qsize":1\}\}\]$"#.to_owned()),
            ]))
            .with_status(200)
            .create_async()
            .await;

        let h = harness(&server);
        h.telemetry.add(info(0.5));
        h.uploader.upload_telemetry().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn empty_queues_are_not_uploaded() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let h = harness(&server);
        assert_eq!(h.uploader.upload_telemetry().await.unwrap(), 0);
        assert_eq!(h.uploader.upload_attributes().await.unwrap(), 0);
        assert_eq!(h.telemetry.num_entries(), 0);
        mock.assert_async().await;
    }
}
