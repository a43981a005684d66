use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;

/// Device access token issued by the cloud endpoint
///
/// The token is part of every request path, it identifies and authenticates
/// the device at the same time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceToken(String);

impl Deref for DeviceToken {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeviceToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<DeviceToken> for String {
    fn from(value: DeviceToken) -> Self {
        value.0
    }
}
