// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Device presence: capability introspection and heartbeats.
//!
//! A device periodically reports liveness and what it can do so a remote
//! peer knows whether to push directly or queue. Heartbeats are fire-and-
//! forget: a failed send reports `ok: false` and must never crash the
//! caller's loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::device::DeviceCapabilities;
use crate::error::Result;

/// Default heartbeat interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Supplies the capability set of the running platform.
///
/// Injected at startup per platform rather than sniffed from the runtime
/// environment: a browser shell reports push iff notification permission
/// is granted, deeplink iff running installed, and so on, while a
/// server-like context reports everything. Implementations must be pure,
/// synchronous, and side-effect-free.
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;
}

/// Capability provider for server-like contexts: everything available.
#[derive(Debug, Default)]
pub struct ServerCapabilities;

impl CapabilityProvider for ServerCapabilities {
    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::all()
    }
}

/// A fixed capability set, for platforms that detect once at startup.
#[derive(Debug, Clone, Copy)]
pub struct StaticCapabilities(pub DeviceCapabilities);

impl CapabilityProvider for StaticCapabilities {
    fn capabilities(&self) -> DeviceCapabilities {
        self.0
    }
}

/// Callable RPC collaborator used for heartbeats and token registration.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Invokes a named remote callable with a JSON payload.
    async fn call(&self, name: &str, data: Value) -> Result<Value>;
}

/// What one heartbeat reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub device_id: String,
    pub app_version: String,
    pub capabilities: DeviceCapabilities,
}

/// Outcome of a heartbeat send. Failure is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAck {
    pub ok: bool,
}

/// Sends one heartbeat over the transport.
///
/// Transport failures are logged at warn and downgraded to `ok: false`;
/// this function never returns an error.
pub async fn send_heartbeat(
    transport: &dyn RpcTransport,
    payload: &HeartbeatPayload,
) -> HeartbeatAck {
    let data = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!("heartbeat payload not serializable: {e}");
            return HeartbeatAck { ok: false };
        }
    };
    match transport.call("sendHeartbeat", data).await {
        Ok(_) => HeartbeatAck { ok: true },
        Err(e) => {
            warn!("heartbeat send failed for {}: {e}", payload.device_id);
            HeartbeatAck { ok: false }
        }
    }
}

/// Registers a push token for a device.
///
/// Unlike heartbeats this is not best-effort: the caller needs to know
/// the token did not stick so it can retry registration.
pub async fn register_fcm_token(
    transport: &dyn RpcTransport,
    device_id: &str,
    token: &str,
) -> Result<()> {
    transport
        .call("registerFCMToken", json!({ "device_id": device_id, "fcm_token": token }))
        .await
        .map(|_| ())
}

/// Owns the repeating heartbeat timer for one device.
///
/// At most one active timer per manager instance: `start` on a running
/// manager warns and does nothing. `stop` cancels future sends only;
/// an in-flight RPC is not aborted.
pub struct HeartbeatManager {
    transport: Arc<dyn RpcTransport>,
    payload: HeartbeatPayload,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatManager {
    /// Creates a manager with the default 30-second interval.
    pub fn new(transport: Arc<dyn RpcTransport>, payload: HeartbeatPayload) -> Self {
        Self::with_interval(transport, payload, HEARTBEAT_INTERVAL)
    }

    /// Creates a manager with a custom interval (tests, embedders).
    pub fn with_interval(
        transport: Arc<dyn RpcTransport>,
        payload: HeartbeatPayload,
        interval: Duration,
    ) -> Self {
        HeartbeatManager { transport, payload, interval, task: None }
    }

    /// Sends one heartbeat immediately, then on every interval tick.
    ///
    /// No-op (with a warning) if already started.
    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("heartbeat already running for {}; start ignored", self.payload.device_id);
            return;
        }

        let transport = Arc::clone(&self.transport);
        let payload = self.payload.clone();
        let period = self.interval;
        self.task = Some(tokio::spawn(async move {
            // The first tick fires immediately.
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let _ = send_heartbeat(transport.as_ref(), &payload).await;
            }
        }));
    }

    /// Cancels the timer. Future sends stop; an in-flight send completes.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether the timer is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "presence_tests.rs"]
mod tests;
