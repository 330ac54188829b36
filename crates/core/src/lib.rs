// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! tether-core: Cross-device synchronization engine
//!
//! This crate lets a single logical user operate the same project/session
//! state from multiple intermittently-connected devices. It provides
//! conflict resolution between locally and remotely mutated records, an
//! offline mutation queue per device with pluggable durable storage,
//! presence heartbeats, and a time-boxed device-handoff protocol.

pub mod clock;
pub mod conflict;
pub mod db;
pub mod device;
pub mod error;
pub mod handoff;
pub mod presence;
pub mod queue;

pub use clock::{generate_id, ClockSource, ManualClock, SystemClock};
pub use conflict::{
    detect_conflict, merge_arrays, merge_json_arrays, merge_queues, resolve_field_lww,
    resolve_lww, three_way_merge, ConflictInfo, ConflictReason, FieldTimestamps, MergeOutcome,
    QueueOrd, Versioned, CONCURRENT_EDIT_WINDOW_MS,
};
pub use db::Database;
pub use device::{Device, DeviceCapabilities, DeviceStatus, DeviceType, Platform};
pub use error::{Error, Result};
pub use handoff::{
    deep_link, spawn_cleanup_task, HandoffCoordinator, HandoffPayload, HandoffTicket, Handshake,
    NoopPush, PushMessage, PushReceipt, PushSender, CLEANUP_BATCH, HANDSHAKE_TTL_MS,
};
pub use presence::{
    register_fcm_token, send_heartbeat, CapabilityProvider, HeartbeatAck, HeartbeatManager,
    HeartbeatPayload, RpcTransport, ServerCapabilities, StaticCapabilities, HEARTBEAT_INTERVAL,
};
pub use queue::{
    open_queue_store, DeviceQueue, IndexedQueueStore, OfflineQueueStore, QueueDbLocation,
    QueueItem, SimpleQueueStore, StorageEngine,
};
