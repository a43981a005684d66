use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use super::handler::RpcHandler;

/// Known locations of the front panel RGB LED
pub const LED_PATHS: [&str; 2] = [
    "/sys/class/leds/ec:power/",
    "/sys/class/leds/chromeos:multicolor:power/",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    Off,
    Red,
    Green,
    Blue,
    Yellow,
    White,
}

impl LedColor {
    /// The `multi_intensity` value for this color
    pub fn intensity(&self) -> &'static str {
        match self {
            LedColor::Off => "0 0 0",
            LedColor::Red => "100 0 0",
            LedColor::Green => "0 100 0",
            LedColor::Blue => "0 0 100",
            LedColor::Yellow => "100 10 0",
            LedColor::White => "100 100 100",
        }
    }
}

#[derive(Debug, Error)]
#[error("unsupported color '{0}'")]
pub struct UnknownColor(String);

impl FromStr for LedColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(LedColor::Off),
            "red" => Ok(LedColor::Red),
            "green" => Ok(LedColor::Green),
            "blue" => Ok(LedColor::Blue),
            "yellow" => Ok(LedColor::Yellow),
            "white" => Ok(LedColor::White),
            other => Err(UnknownColor(other.to_owned())),
        }
    }
}

/// A sysfs multicolor LED
#[derive(Debug, Clone)]
pub struct RgbLed {
    dir: PathBuf,
}

impl RgbLed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Find the first of the given LED directories that exists
    pub fn probe<P: AsRef<Path>>(candidates: &[P]) -> Option<Self> {
        for dir in candidates {
            let dir: &Path = dir.as_ref();
            if dir.is_dir() {
                return Some(Self::new(dir));
            }
        }
        None
    }

    pub fn set(&self, color: LedColor) -> io::Result<()> {
        fs::write(self.dir.join("multi_intensity"), color.intensity())?;
        fs::write(self.dir.join("brightness"), "100")?;
        Ok(())
    }
}

/// The `led` RPC, `params` is the color name
#[derive(Debug, Default)]
pub struct LedControl {
    led: Option<RgbLed>,
}

impl LedControl {
    pub fn new(led: Option<RgbLed>) -> Self {
        Self { led }
    }

    /// Use the LED found at the well known sysfs locations, if any
    pub fn probe() -> Self {
        let led = RgbLed::probe(&LED_PATHS);
        if led.is_none() {
            warn!("no RGB LED found");
        }
        Self { led }
    }
}

impl RpcHandler for LedControl {
    fn method(&self) -> &str {
        "led"
    }

    fn run(&self, params: &Value) -> bool {
        let color = match params.as_str().map(str::parse::<LedColor>) {
            Some(Ok(color)) => color,
            Some(Err(e)) => {
                info!("{e}");
                return false;
            }
            None => {
                info!("expected a color name, got {params}");
                return false;
            }
        };

        let Some(led) = &self.led else {
            warn!("cannot set LED color, no LED present");
            return false;
        };

        info!("setting LED to {}", color.intensity());
        if let Err(e) = led.set(color) {
            warn!("failed to set LED color: {e}");
            return false;
        }
        true
    }
}
