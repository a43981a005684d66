//! Typed read-only views of well-known state store sections
//!
//! Collectors publish loosely typed JSON. The views accept what the
//! collectors produce in practice: numbers may arrive as strings, readings
//! may be `null` while a sensor is unavailable and unknown keys are ignored.
//! A field that cannot be interpreted reads as `None`.

use serde::Deserialize;
use serde_json::{Map, Value};

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_integer(value: &Value) -> Option<u64> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(as_number))
    }

    pub fn integer<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().and_then(as_integer))
    }

    pub fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First element of a list of numbers, e.g. the 1 minute load average
    pub fn first_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) => items.first().and_then(as_number),
            Some(other) => as_number(&other),
            None => None,
        })
    }

    /// Second element of a list of integers, e.g. free memory out of
    /// `[total, free]`
    pub fn second_integer<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) => items.get(1).and_then(as_integer),
            _ => None,
        })
    }

    /// A `[rx, tx]` pair of byte counters
    pub fn counter_pair<'de, D>(deserializer: D) -> Result<Option<(u64, u64)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(match value {
            Some(Value::Array(items)) if items.len() == 2 => {
                match (as_integer(&items[0]), as_integer(&items[1])) {
                    (Some(rx), Some(tx)) => Some((rx, tx)),
                    _ => None,
                }
            }
            _ => None,
        })
    }
}

/// `sys-version`
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SysVersion {
    #[serde(deserialize_with = "lenient::text")]
    pub serial: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub sys: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub bl: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub hw: Option<String>,
}

/// `sys-datetime`
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SysDatetime {
    #[serde(deserialize_with = "lenient::text")]
    pub date: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub uptime: Option<String>,
}

/// `sys-misc`, board level sensor readings
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SysMisc {
    #[serde(rename = "load", deserialize_with = "lenient::first_number")]
    pub load_1min: Option<f64>,
    #[serde(rename = "mem", deserialize_with = "lenient::second_integer")]
    pub mem_free: Option<u64>,

    #[serde(deserialize_with = "lenient::integer")]
    pub cpu1_freq: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub cpu2_freq: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub cpu3_freq: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub cpu4_freq: Option<u64>,

    #[serde(deserialize_with = "lenient::number")]
    pub v_in: Option<f64>,

    #[serde(deserialize_with = "lenient::number")]
    pub temp_mb: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_mb2: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_eth: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_nmcf1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_nmcf2: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_nmcf3: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_nmcf4: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_phy1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_phy2: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_phy3: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_eth_switch: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_nvm_ssd: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_wifi_wle3000: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc2: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc3: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc4: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc5: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc6: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_tc7: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_ap: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_cp0: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub temp_cp2: Option<f64>,

    #[serde(deserialize_with = "lenient::number")]
    pub pwr_mb: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pwr_eth: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pwr_nmcf1: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pwr_nmcf2: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pwr_nmcf3: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub pwr_nmcf4: Option<f64>,
}

/// `link`, round trip measurements over the cellular link
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LinkInfo {
    /// Latency in seconds
    #[serde(deserialize_with = "lenient::number")]
    pub delay: Option<f64>,
}

/// `modem`, as published by the modem manager collector
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModemInfo {
    #[serde(deserialize_with = "lenient::text")]
    pub revision: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub access_tech: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub access_tech2: Option<String>,
    #[serde(deserialize_with = "lenient::integer")]
    pub signal_quality: Option<u64>,
    #[serde(deserialize_with = "lenient::text")]
    pub bearer_id: Option<String>,
    #[serde(deserialize_with = "lenient::integer")]
    pub bearer_uptime: Option<u64>,
    #[serde(deserialize_with = "lenient::text")]
    pub bearer_ip: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub sim_id: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub sim_imsi: Option<String>,
    #[serde(deserialize_with = "lenient::text")]
    pub sim_iccid: Option<String>,
}

/// `net-<ifname>`
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NetIface {
    /// `(rx, tx)` byte counters
    #[serde(deserialize_with = "lenient::counter_pair")]
    pub bytes: Option<(u64, u64)>,
}

/// `traffic-<ifname>`, accumulated traffic counters
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TrafficInfo {
    #[serde(deserialize_with = "lenient::integer")]
    pub day_rx: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub day_tx: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub month_rx: Option<u64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub month_tx: Option<u64>,
}

/// `network`, host connectivity as reported by the network manager
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct NetworkInfo {
    /// One of `full`, `limited`, `portal`, `none` or `unknown`
    #[serde(deserialize_with = "lenient::text")]
    pub inet_conn: Option<String>,
}

/// `gnss-pos`, the latest position fix
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct GnssFix {
    /// Latitude in degrees
    #[serde(deserialize_with = "lenient::number")]
    pub lat: Option<f64>,
    /// Longitude in degrees
    #[serde(deserialize_with = "lenient::number")]
    pub lon: Option<f64>,
    /// Anything else the receiver reported (altitude, speed, fix mode, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
