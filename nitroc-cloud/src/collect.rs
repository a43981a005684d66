use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, trace};

use crate::model::sections::{
    GnssFix, LinkInfo, ModemInfo, NetIface, SysDatetime, SysMisc, SysVersion, TrafficInfo,
};
use crate::model::{Snapshot, StateStore};
use crate::queue::TransmitQueue;
use crate::record::{Attributes, GnssPosition, InfoTelemetry, Telemetry, TrafficTelemetry};

pub const COLLECT_PERIOD: Duration = Duration::from_secs(1);

const ATTRIBUTES_EVERY: u64 = 120;
const INFO_EVERY: u64 = 10;
const TRAFFIC_EVERY: u64 = 120;
const POSITION_FORCED_EVERY: u64 = 60;

/// Minimum movement in meters before a new position is reported
const POSITION_THRESHOLD: f64 = 1.5;

const EARTH_RADIUS: f64 = 6371e3;

/// Great circle distance in meters between two points given in radians
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS * c
}

/// Map a modem access technology to its generation
pub fn rat_to_number(rat: &str) -> u8 {
    if rat.contains("5gnr") {
        5
    } else if rat.contains("lte") {
        4
    } else if rat.contains("umts") {
        3
    } else if rat.contains("gsm") {
        2
    } else {
        0
    }
}

/// Build device attributes, requires `sys-version`
pub fn attributes(snapshot: &Snapshot) -> Option<Attributes> {
    let version: SysVersion = snapshot.section("sys-version")?;
    let datetime: SysDatetime = snapshot.section("sys-datetime").unwrap_or_default();
    let modem: ModemInfo = snapshot.section("modem").unwrap_or_default();

    let (sim_imsi, sim_iccid) = if modem.sim_id.is_some() {
        (modem.sim_imsi, modem.sim_iccid)
    } else {
        (None, None)
    };

    Some(Attributes {
        serial: version.serial,
        os_version: version.sys,
        ui_version: env!("CARGO_PKG_VERSION").to_owned(),
        hardware: version.hw,
        uptime: datetime.uptime,
        wwan_version: modem.revision,
        sim_imsi,
        sim_iccid,
    })
}

/// Build the periodic info record from whatever readings are available
pub fn info(snapshot: &Snapshot) -> InfoTelemetry {
    let mut info = InfoTelemetry::default();

    if let Some(misc) = snapshot.section::<SysMisc>("sys-misc") {
        info.cpu_load = misc.load_1min;
        info.cpu1_freq = misc.cpu1_freq;
        info.cpu2_freq = misc.cpu2_freq;
        info.cpu3_freq = misc.cpu3_freq;
        info.cpu4_freq = misc.cpu4_freq;
        info.voltage_in = misc.v_in;
        info.mem_free = misc.mem_free;

        info.temp_pcb_main1 = misc.temp_mb;
        info.temp_pcb_main2 = misc.temp_mb2;
        info.temp_pcb_eth = misc.temp_eth;
        info.temp_pcb_nmcf1 = misc.temp_nmcf1;
        info.temp_pcb_nmcf2 = misc.temp_nmcf2;
        info.temp_pcb_nmcf3 = misc.temp_nmcf3;
        info.temp_pcb_nmcf4 = misc.temp_nmcf4;
        info.temp_ic_phy1 = misc.temp_phy1;
        info.temp_ic_phy2 = misc.temp_phy2;
        info.temp_ic_phy3 = misc.temp_phy3;
        info.temp_eth_switch = misc.temp_eth_switch;
        info.temp_nvm_ssd = misc.temp_nvm_ssd;
        info.temp_wle3000_1 = misc.temp_wifi_wle3000;
        info.temp_tc1 = misc.temp_tc1;
        info.temp_tc2 = misc.temp_tc2;
        info.temp_tc3 = misc.temp_tc3;
        info.temp_tc4 = misc.temp_tc4;
        info.temp_tc5 = misc.temp_tc5;
        info.temp_tc6 = misc.temp_tc6;
        info.temp_tc7 = misc.temp_tc7;
        info.temp_ic_ap = misc.temp_ap;
        info.temp_ic_cp0 = misc.temp_cp0;
        info.temp_ic_cp2 = misc.temp_cp2;

        info.pwr_mb = misc.pwr_mb;
        info.pwr_eth = misc.pwr_eth;
        // unpowered NMCF slots read as null, report them as 0 W
        info.pwr_nmcf1 = Some(misc.pwr_nmcf1.unwrap_or(0.0));
        info.pwr_nmcf2 = Some(misc.pwr_nmcf2.unwrap_or(0.0));
        info.pwr_nmcf3 = Some(misc.pwr_nmcf3.unwrap_or(0.0));
        info.pwr_nmcf4 = Some(misc.pwr_nmcf4.unwrap_or(0.0));
    }

    if let Some(link) = snapshot.section::<LinkInfo>("link")
        && let Some(delay) = link.delay
    {
        info.wwan_delay = Some((delay * 1000.0).round().max(0.0) as u64);
    }

    if let Some(modem) = snapshot.section::<ModemInfo>("modem") {
        info.rat = modem
            .access_tech
            .as_deref()
            .filter(|tech| !tech.is_empty())
            .map(rat_to_number);
        info.rat2 = modem
            .access_tech2
            .as_deref()
            .filter(|tech| !tech.is_empty())
            .map(rat_to_number);
        info.signal_quality = modem.signal_quality;

        if modem.bearer_id.is_some() {
            info.bearer_id = modem.bearer_id;
            info.bearer_uptime = modem.bearer_uptime;
        }
    }

    if let Some((rx, tx)) = snapshot
        .section::<NetIface>("net-wwan0")
        .and_then(|iface| iface.bytes)
    {
        info.wwan0_rx = Some(rx);
        info.wwan0_tx = Some(tx);
    }

    if let Some((rx, tx)) = snapshot
        .section::<NetIface>("net-wlan0")
        .and_then(|iface| iface.bytes)
    {
        info.wlan0_rx = Some(rx);
        info.wlan0_tx = Some(tx);
    }

    info
}

/// Build the cellular traffic record, requires `traffic-wwan0`
pub fn traffic(snapshot: &Snapshot) -> Option<TrafficTelemetry> {
    let counters: TrafficInfo = snapshot.section("traffic-wwan0")?;
    Some(TrafficTelemetry {
        wwan0_rx_day: counters.day_rx,
        wwan0_tx_day: counters.day_tx,
        wwan0_rx_month: counters.month_rx,
        wwan0_tx_month: counters.month_tx,
    })
}

/// Samples the state store once per tick and enqueues records
///
/// Each record kind has its own sampling period, the tick counter starts
/// at 0 so everything is sampled on the first tick.
pub struct DataCollector {
    attributes: Arc<TransmitQueue<Attributes>>,
    telemetry: Arc<TransmitQueue<Telemetry>>,
    counter: u64,
    /// Last reported position in radians
    last_position: (f64, f64),
}

impl DataCollector {
    pub fn new(
        attributes: Arc<TransmitQueue<Attributes>>,
        telemetry: Arc<TransmitQueue<Telemetry>>,
    ) -> Self {
        Self {
            attributes,
            telemetry,
            counter: 0,
            last_position: (0.0, 0.0),
        }
    }

    pub fn tick(&mut self, snapshot: &Snapshot) {
        if self.counter.is_multiple_of(ATTRIBUTES_EVERY)
            && let Some(attributes) = attributes(snapshot)
        {
            trace!("queueing attributes");
            self.attributes.add(attributes);
        }

        if self.counter.is_multiple_of(INFO_EVERY) {
            let info = info(snapshot);
            if !info.is_empty() {
                trace!("queueing info telemetry");
                self.telemetry.add(info.into());
            }
        }

        if self.counter.is_multiple_of(TRAFFIC_EVERY)
            && let Some(traffic) = traffic(snapshot).filter(|t| !t.is_empty())
        {
            trace!("queueing traffic telemetry");
            self.telemetry.add(traffic.into());
        }

        let force = self.counter.is_multiple_of(POSITION_FORCED_EVERY);
        if let Some(position) = self.position(snapshot, force) {
            trace!("queueing position");
            self.telemetry.add(position.into());
        }

        self.counter += 1;
    }

    fn position(&mut self, snapshot: &Snapshot, force: bool) -> Option<GnssPosition> {
        let fix: GnssFix = snapshot.section("gnss-pos")?;
        let (lat, lon) = (fix.lat?, fix.lon?);

        let (lat_rad, lon_rad) = (lat.to_radians(), lon.to_radians());
        let (last_lat, last_lon) = self.last_position;
        let moved = haversine_distance(last_lat, last_lon, lat_rad, lon_rad);

        if moved <= POSITION_THRESHOLD && !force {
            return None;
        }

        if moved > POSITION_THRESHOLD {
            debug!("position moved by {moved:.1} m");
        }
        self.last_position = (lat_rad, lon_rad);

        Some(GnssPosition {
            lat,
            lon,
            extra: fix.extra,
        })
    }
}

/// Sample the state store while the cloud service is active
#[instrument(name = "collect", skip_all)]
pub async fn start_collect(
    mut collector: DataCollector,
    model: Arc<dyn StateStore>,
    mut active_rx: watch::Receiver<bool>,
) {
    info!("data collector ready");

    let mut interval = time::interval(COLLECT_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;

        if active_rx.has_changed().is_err() {
            break;
        }

        if *active_rx.borrow_and_update() {
            collector.tick(&model.get_all());
        }
    }
    trace!("activity channel closed");
}
