// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Core device types for the tether sync engine.
//!
//! A [`Device`] is one physical or app endpoint belonging to one user. The
//! engine never deletes devices; account management owns that lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Form factor of a device endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Browser tab or installed PWA.
    Web,
    /// Native desktop app.
    Desktop,
    /// Native mobile app.
    Mobile,
}

impl DeviceType {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Web => "web",
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "web" => Ok(DeviceType::Web),
            "desktop" => Ok(DeviceType::Desktop),
            "mobile" => Ok(DeviceType::Mobile),
            _ => Err(Error::InvalidDeviceType(s.to_string())),
        }
    }
}

/// Operating platform of a device endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Mac,
    Win,
    Linux,
    Ios,
    Android,
    Web,
}

impl Platform {
    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mac => "mac",
            Platform::Win => "win",
            Platform::Linux => "linux",
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mac" => Ok(Platform::Mac),
            "win" => Ok(Platform::Win),
            "linux" => Ok(Platform::Linux),
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            _ => Err(Error::InvalidPlatform(s.to_string())),
        }
    }
}

/// What a device endpoint can do, as reported by its platform shell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Can receive push notifications.
    pub push: bool,
    /// Can open deep links.
    pub deeplink: bool,
    /// Has a clipboard API.
    pub clipboard: bool,
    /// Has a durable offline store.
    pub offline: bool,
}

impl DeviceCapabilities {
    /// Capabilities with everything enabled.
    pub fn all() -> Self {
        DeviceCapabilities { push: true, deeplink: true, clipboard: true, offline: true }
    }

    /// Capabilities with everything disabled.
    pub fn none() -> Self {
        DeviceCapabilities::default()
    }
}

/// Liveness state of a device, updated by heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Whether the device is currently considered reachable.
    pub online: bool,
    /// Last time any activity was observed, epoch-ms.
    pub last_seen_ms: u64,
    /// Last heartbeat received, epoch-ms.
    pub heartbeat_ms: u64,
}

/// One physical/app endpoint belonging to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable per-install identifier.
    pub id: String,
    /// Owning user account.
    pub user_id: String,
    pub device_type: DeviceType,
    pub platform: Platform,
    pub capabilities: DeviceCapabilities,
    pub status: DeviceStatus,
    /// Push registration token, if the platform granted one.
    pub fcm_token: Option<String>,
    pub app_version: String,
}

impl Device {
    /// Creates a new device record with offline status and no push token.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        device_type: DeviceType,
        platform: Platform,
        capabilities: DeviceCapabilities,
        app_version: impl Into<String>,
    ) -> Self {
        Device {
            id: id.into(),
            user_id: user_id.into(),
            device_type,
            platform,
            capabilities,
            status: DeviceStatus::default(),
            fcm_token: None,
            app_version: app_version.into(),
        }
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
