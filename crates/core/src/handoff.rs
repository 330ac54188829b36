// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Time-boxed device handoff.
//!
//! A [`Handshake`] is a one-time ticket that transfers an in-progress
//! working context (open project/session/file) from one of a user's
//! devices to another. State machine per handshake:
//!
//! ```text
//! created -> (consumed | expired)
//! ```
//!
//! Both outcomes are terminal. Expiry is the only cancellation mechanism;
//! there is no cancel-by-id API by design.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::{generate_id, ClockSource};
use crate::db::Database;
use crate::error::{Error, Result};

/// Handshakes live for five minutes. A hard business rule, not per-call
/// configuration.
pub const HANDSHAKE_TTL_MS: u64 = 5 * 60 * 1000;

/// Maximum expired handshakes deleted per cleanup run, to bound work per
/// invocation.
pub const CLEANUP_BATCH: usize = 100;

/// The working context carried by a handoff.
///
/// Tagged union rather than an opaque blob; `Unknown` absorbs payload
/// types newer than this build so decoding never fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandoffPayload {
    OpenProject {
        project_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    OpenSession {
        job_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    OpenFile {
        file_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },
    /// Forward-compatibility catch-all for payload types this build does
    /// not know about.
    #[serde(other)]
    Unknown,
}

impl HandoffPayload {
    /// The wire tag for this payload type.
    pub fn kind(&self) -> &'static str {
        match self {
            HandoffPayload::OpenProject { .. } => "open_project",
            HandoffPayload::OpenSession { .. } => "open_session",
            HandoffPayload::OpenFile { .. } => "open_file",
            HandoffPayload::Unknown => "unknown",
        }
    }
}

/// Computes the deep link the target device's shell opens on handoff.
///
/// Total over all payload types; unknown types map to the app root. The
/// URI formats are the bit-exact contract the receiving shell parses.
pub fn deep_link(payload: &HandoffPayload) -> String {
    match payload {
        HandoffPayload::OpenProject { project_id, .. } => {
            format!("f0://open?project={project_id}")
        }
        HandoffPayload::OpenSession { job_id, .. } => format!("f0://session/{job_id}"),
        HandoffPayload::OpenFile { file_id, .. } => format!("f0://file/{file_id}"),
        HandoffPayload::Unknown => "f0://".to_string(),
    }
}

/// Push notification title for a handoff, by payload type.
pub fn push_title(payload: &HandoffPayload) -> &'static str {
    match payload {
        HandoffPayload::OpenProject { .. } => "Continue your project",
        HandoffPayload::OpenSession { .. } => "Continue your session",
        HandoffPayload::OpenFile { .. } => "Continue editing",
        HandoffPayload::Unknown => "Continue on this device",
    }
}

/// Push notification body for a handoff, by payload type.
pub fn push_body(payload: &HandoffPayload) -> String {
    match payload {
        HandoffPayload::OpenProject { .. } => {
            "Pick up your project where you left off".to_string()
        }
        HandoffPayload::OpenSession { .. } => {
            "Your session is ready to continue here".to_string()
        }
        HandoffPayload::OpenFile { .. } => "Your file is ready to continue here".to_string(),
        HandoffPayload::Unknown => "Something was handed off to this device".to_string(),
    }
}

/// A one-time transfer ticket between two devices of the same user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub id: String,
    pub user_id: String,
    pub from_device: String,
    pub to_device: String,
    pub payload: HandoffPayload,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub consumed: bool,
    pub consumed_at_ms: Option<u64>,
}

/// What `create` hands back to the initiating device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffTicket {
    pub id: String,
    pub deep_link: String,
}

/// A structured push notification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub click_action: String,
}

/// Delivery result reported by the push collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Push-delivery collaborator (e.g. an FCM gateway). Not implemented here.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: PushMessage) -> Result<PushReceipt>;
}

/// A push sender that drops everything. For tests and push-less deployments.
#[derive(Debug, Default)]
pub struct NoopPush;

#[async_trait]
impl PushSender for NoopPush {
    async fn send(&self, _message: PushMessage) -> Result<PushReceipt> {
        Ok(PushReceipt { ok: true, count: Some(0) })
    }
}

/// Creates, notifies, and consumes handshakes between paired devices.
pub struct HandoffCoordinator {
    db: Arc<Mutex<Database>>,
    push: Arc<dyn PushSender>,
    clock: Arc<dyn ClockSource>,
}

impl HandoffCoordinator {
    pub fn new(
        db: Arc<Mutex<Database>>,
        push: Arc<dyn PushSender>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        HandoffCoordinator { db, push, clock }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Creates a handshake from one device to another and best-effort
    /// notifies the target.
    ///
    /// The target must belong to the same user as the source; anything
    /// else reports "device not found" without revealing whether the id
    /// exists. Push delivery failures are logged and swallowed: the
    /// handoff is created either way.
    pub async fn create(
        &self,
        from_device_id: &str,
        to_device_id: &str,
        payload: HandoffPayload,
    ) -> Result<HandoffTicket> {
        if from_device_id.is_empty() || to_device_id.is_empty() {
            return Err(Error::InvalidInput("device ids must be non-empty".to_string()));
        }
        if from_device_id == to_device_id {
            return Err(Error::InvalidInput(
                "cannot hand off a context to the same device".to_string(),
            ));
        }

        let (handshake, target) = {
            let db = self.db();
            let from = db.get_device(from_device_id)?;
            let to = db.get_device(to_device_id)?;
            if from.user_id != to.user_id {
                return Err(Error::DeviceNotFound(to_device_id.to_string()));
            }

            let now = self.clock.now_ms();
            let handshake = Handshake {
                id: generate_id(self.clock.as_ref()),
                user_id: from.user_id,
                from_device: from.id,
                to_device: to.id.clone(),
                payload,
                created_at_ms: now,
                expires_at_ms: now + HANDSHAKE_TTL_MS,
                consumed: false,
                consumed_at_ms: None,
            };
            db.insert_handshake(&handshake)?;
            (handshake, to)
        };

        let link = deep_link(&handshake.payload);

        if target.capabilities.push {
            if let Some(token) = target.fcm_token {
                let message = PushMessage {
                    token,
                    title: push_title(&handshake.payload).to_string(),
                    body: push_body(&handshake.payload),
                    data: json!({
                        "handoff_id": handshake.id,
                        "type": handshake.payload.kind(),
                        "deep_link": link,
                    }),
                    click_action: link.clone(),
                };
                match self.push.send(message).await {
                    Ok(receipt) if !receipt.ok => {
                        warn!("handoff push not delivered to {}", handshake.to_device);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("handoff push dispatch failed for {}: {e}", handshake.to_device);
                    }
                }
            }
        }

        Ok(HandoffTicket { id: handshake.id, deep_link: link })
    }

    /// Consumes a handshake on the target device, exactly once.
    ///
    /// Fails with a discriminable error for each way this can go wrong so
    /// the UI can explain expired vs. already-used vs. wrong device and
    /// guide re-initiation from the source.
    pub fn consume(
        &self,
        handoff_id: &str,
        device_id: &str,
        requesting_user_id: &str,
    ) -> Result<HandoffPayload> {
        let db = self.db();
        let handshake = db.get_handshake(handoff_id)?;

        if handshake.user_id != requesting_user_id {
            return Err(Error::PermissionDenied(format!(
                "handshake {handoff_id} belongs to another user"
            )));
        }
        if handshake.to_device != device_id {
            return Err(Error::PermissionDenied(format!(
                "handshake {handoff_id} targets a different device"
            )));
        }

        let now = self.clock.now_ms();
        if now > handshake.expires_at_ms {
            return Err(Error::HandshakeExpired(handoff_id.to_string()));
        }
        if handshake.consumed {
            return Err(Error::HandshakeConsumed(handoff_id.to_string()));
        }

        // The guarded UPDATE decides the race: exactly one caller observes
        // the false -> true transition.
        if !db.mark_handshake_consumed(handoff_id, now)? {
            return Err(Error::HandshakeConsumed(handoff_id.to_string()));
        }

        Ok(handshake.payload)
    }

    /// Deletes expired handshakes, at most [`CLEANUP_BATCH`] per run.
    ///
    /// Idempotent and safe to run redundantly or concurrently.
    pub fn cleanup(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        self.db().delete_expired_handshakes(now, CLEANUP_BATCH)
    }
}

/// Spawns a background task that sweeps expired handshakes on an interval.
///
/// Errors are logged and the sweep continues on the next tick.
pub fn spawn_cleanup_task(
    coordinator: Arc<HandoffCoordinator>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match coordinator.cleanup() {
                Ok(0) => {}
                Ok(n) => debug!("swept {n} expired handshakes"),
                Err(e) => warn!("handshake cleanup failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
#[path = "handoff_tests.rs"]
mod tests;
