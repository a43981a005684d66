/*
This module is home to everything related to the cloud telemetry server
the device reports to.

Measurements are sampled out of the shared state store into bounded
transmit queues and uploaded in batches whenever the device has internet
connectivity. While connected, a long-poll channel lets the server invoke
device local procedures such as a reboot.
*/

mod client;
mod collect;
mod config;
mod queue;
mod record;
mod rpc;
mod service;
mod upload;

pub use client::{CloudClient, Endpoint, PostError, STATUS_SECTION};
pub use collect::{DataCollector, haversine_distance, rat_to_number, start_collect};
pub use config::{CloudConfig, ConfigError, ConfigFile, RequestConfig};
pub use queue::{Record, TransmitQueue};
pub use record::{
    Attributes, GnssPosition, InfoTelemetry, QueueSize, Telemetry, TelemetryEntry,
    TrafficTelemetry,
};
pub use rpc::led::{LED_PATHS, LedColor, LedControl, RgbLed};
pub use rpc::system::SystemAction;
pub use rpc::{
    PollError, RegistryError, RpcControl, RpcHandler, RpcListener, RpcRegistry, start_rpc,
};
pub use service::{CLOUD_SECTION, CloudService, EnableStatus, start_cloud};
pub use upload::{UplinkState, Uploader, has_connectivity, start_upload};

use nitroc_model as model;
use nitroc_util as util;
