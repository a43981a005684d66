use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::queue::Record;

fn as_string<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: ToString,
{
    match value {
        Some(v) => serializer.serialize_str(&v.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Static device attributes
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Attributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    pub ui_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wwan_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sim_iccid: Option<String>,
}

/// Periodic board, modem and interface readings
///
/// Only readings present in the state store are serialized.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct InfoTelemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_load: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu1_freq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu2_freq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu3_freq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu4_freq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage_in: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_free: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_main1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_main2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_eth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_nmcf1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_nmcf2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_nmcf3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_pcb_nmcf4: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_phy1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_phy2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_phy3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_eth_switch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_nvm_ssd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_wle3000_1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc4: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc5: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc6: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_tc7: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_ap: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_cp0: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_ic_cp2: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_eth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_nmcf1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_nmcf2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_nmcf3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwr_nmcf4: Option<f64>,

    /// Link latency in milliseconds
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan_delay: Option<u64>,

    /// Radio access technology generation, 0 if unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rat2: Option<u8>,

    // the server side dashboards expect this spelling
    #[serde(rename = "siqnal-qlt", skip_serializing_if = "Option::is_none")]
    pub signal_quality: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_uptime: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_rx: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_tx: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wlan0_rx: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wlan0_tx: Option<u64>,
}

impl InfoTelemetry {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Accumulated traffic counters of the cellular interface
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TrafficTelemetry {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_rx_day: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_tx_day: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_rx_month: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_string")]
    pub wwan0_tx_month: Option<u64>,
}

impl TrafficTelemetry {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A position fix, forwarded as published by the GNSS collector
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GnssPosition {
    pub lat: f64,
    pub lon: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Number of telemetry records waiting for upload
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSize {
    #[serde(rename = "tb-qsize")]
    pub entries: usize,
}

/// A telemetry payload
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Telemetry {
    Info(InfoTelemetry),
    Traffic(TrafficTelemetry),
    Position(GnssPosition),
    QueueSize(QueueSize),
}

impl From<InfoTelemetry> for Telemetry {
    fn from(value: InfoTelemetry) -> Self {
        Telemetry::Info(value)
    }
}

impl From<TrafficTelemetry> for Telemetry {
    fn from(value: TrafficTelemetry) -> Self {
        Telemetry::Traffic(value)
    }
}

impl From<GnssPosition> for Telemetry {
    fn from(value: GnssPosition) -> Self {
        Telemetry::Position(value)
    }
}

impl From<QueueSize> for Telemetry {
    fn from(value: QueueSize) -> Self {
        Telemetry::QueueSize(value)
    }
}

/// Wire form of a telemetry record, `{"ts": .., "values": {..}}`
#[derive(Serialize, Debug)]
pub struct TelemetryEntry<'a> {
    pub ts: u64,
    pub values: &'a Telemetry,
}

impl<'a> From<&'a Record<Telemetry>> for TelemetryEntry<'a> {
    fn from(record: &'a Record<Telemetry>) -> Self {
        Self {
            ts: record.ts,
            values: &record.payload,
        }
    }
}
