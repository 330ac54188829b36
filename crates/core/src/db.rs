// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed persistence for devices, handshakes, and device queues.
//!
//! The [`Database`] struct provides all data access operations the engine
//! needs. The two invariants that must survive arbitrary interleaving live
//! here: handshake consumption is a single guarded UPDATE (exactly-once),
//! and popping the oldest queue item reads and deletes inside one
//! transaction (a crash between the two cannot resurrect the item).

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::device::{Device, DeviceCapabilities, DeviceStatus};
use crate::error::{Error, Result};
use crate::handoff::{HandoffPayload, Handshake};
use crate::queue::QueueItem;

/// SQL schema for the sync engine database.
pub const SCHEMA: &str = r#"
-- One row per registered device endpoint
CREATE TABLE IF NOT EXISTS devices (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    device_type TEXT NOT NULL,
    platform TEXT NOT NULL,
    cap_push INTEGER NOT NULL DEFAULT 0,
    cap_deeplink INTEGER NOT NULL DEFAULT 0,
    cap_clipboard INTEGER NOT NULL DEFAULT 0,
    cap_offline INTEGER NOT NULL DEFAULT 0,
    online INTEGER NOT NULL DEFAULT 0,
    last_seen_ms INTEGER NOT NULL DEFAULT 0,
    heartbeat_ms INTEGER NOT NULL DEFAULT 0,
    fcm_token TEXT,
    app_version TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

-- One-time device handoff tickets
CREATE TABLE IF NOT EXISTS handshakes (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    from_device TEXT NOT NULL,
    to_device TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    consumed INTEGER NOT NULL DEFAULT 0,
    consumed_at_ms INTEGER
);

-- Pending mutations per device (indexed queue backend)
CREATE TABLE IF NOT EXISTS queue_items (
    device_id TEXT NOT NULL,
    id TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    retries INTEGER,
    error TEXT,
    PRIMARY KEY (device_id, id)
);

-- Background-consumer progress per device queue
CREATE TABLE IF NOT EXISTS queue_cursors (
    device_id TEXT PRIMARY KEY,
    processed_cursor TEXT,
    cursor_ms INTEGER NOT NULL DEFAULT 0,
    updated_at_ms INTEGER NOT NULL
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_devices_user ON devices(user_id);
CREATE INDEX IF NOT EXISTS idx_handshakes_expiry ON handshakes(expires_at_ms);
CREATE INDEX IF NOT EXISTS idx_queue_items_order ON queue_items(device_id, created_at_ms, id);
"#;

/// Parse a string value from the database, returning a rusqlite error on parse failure.
fn parse_db<T: std::str::FromStr>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!(
                "invalid value '{value}' in column '{column}'"
            ))),
        )
    })
}

/// Parse a JSON payload column.
fn parse_payload<T: serde::de::DeserializeOwned>(
    value: &str,
    column: &str,
) -> std::result::Result<T, rusqlite::Error> {
    serde_json::from_str(value).map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(Error::CorruptedData(format!("invalid JSON in column '{column}'"))),
        )
    })
}

/// Run schema creation and all migrations on a database connection.
///
/// Idempotent: safe to run on every open, including databases created by
/// older versions of the engine.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// SQLite-backed database for the sync engine.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        run_migrations(&conn)?;
        Ok(Database { conn })
    }

    /// Opens an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Database { conn })
    }

    // ---- devices ----

    /// Registers a device, updating everything except `created_at` if it
    /// already exists.
    pub fn register_device(&self, device: &Device) -> Result<()> {
        self.conn.execute(
            "INSERT INTO devices (
                id, user_id, device_type, platform,
                cap_push, cap_deeplink, cap_clipboard, cap_offline,
                online, last_seen_ms, heartbeat_ms, fcm_token, app_version, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                device_type = excluded.device_type,
                platform = excluded.platform,
                cap_push = excluded.cap_push,
                cap_deeplink = excluded.cap_deeplink,
                cap_clipboard = excluded.cap_clipboard,
                cap_offline = excluded.cap_offline,
                fcm_token = excluded.fcm_token,
                app_version = excluded.app_version",
            params![
                device.id,
                device.user_id,
                device.device_type.as_str(),
                device.platform.as_str(),
                device.capabilities.push,
                device.capabilities.deeplink,
                device.capabilities.clipboard,
                device.capabilities.offline,
                device.status.online,
                device.status.last_seen_ms,
                device.status.heartbeat_ms,
                device.fcm_token,
                device.app_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetches a device by id.
    pub fn get_device(&self, id: &str) -> Result<Device> {
        self.conn
            .query_row(
                "SELECT id, user_id, device_type, platform,
                        cap_push, cap_deeplink, cap_clipboard, cap_offline,
                        online, last_seen_ms, heartbeat_ms, fcm_token, app_version
                 FROM devices WHERE id = ?1",
                params![id],
                Self::row_to_device,
            )
            .optional()?
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))
    }

    /// Lists all devices belonging to a user.
    pub fn list_devices(&self, user_id: &str) -> Result<Vec<Device>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, device_type, platform,
                    cap_push, cap_deeplink, cap_clipboard, cap_offline,
                    online, last_seen_ms, heartbeat_ms, fcm_token, app_version
             FROM devices WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], Self::row_to_device)?;
        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    fn row_to_device(row: &rusqlite::Row<'_>) -> std::result::Result<Device, rusqlite::Error> {
        let device_type: String = row.get(2)?;
        let platform: String = row.get(3)?;
        Ok(Device {
            id: row.get(0)?,
            user_id: row.get(1)?,
            device_type: parse_db(&device_type, "device_type")?,
            platform: parse_db(&platform, "platform")?,
            capabilities: DeviceCapabilities {
                push: row.get(4)?,
                deeplink: row.get(5)?,
                clipboard: row.get(6)?,
                offline: row.get(7)?,
            },
            status: DeviceStatus {
                online: row.get(8)?,
                last_seen_ms: row.get(9)?,
                heartbeat_ms: row.get(10)?,
            },
            fcm_token: row.get(11)?,
            app_version: row.get(12)?,
        })
    }

    /// Applies a heartbeat to a device's liveness record.
    ///
    /// Timestamps only move forward: a heartbeat older than the recorded
    /// one refreshes nothing but still marks the device online.
    pub fn record_heartbeat(
        &self,
        device_id: &str,
        now_ms: u64,
        app_version: &str,
        capabilities: DeviceCapabilities,
        fcm_token: Option<&str>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE devices SET
                online = 1,
                last_seen_ms = MAX(last_seen_ms, ?2),
                heartbeat_ms = MAX(heartbeat_ms, ?2),
                app_version = ?3,
                cap_push = ?4,
                cap_deeplink = ?5,
                cap_clipboard = ?6,
                cap_offline = ?7,
                fcm_token = COALESCE(?8, fcm_token)
             WHERE id = ?1",
            params![
                device_id,
                now_ms,
                app_version,
                capabilities.push,
                capabilities.deeplink,
                capabilities.clipboard,
                capabilities.offline,
                fcm_token,
            ],
        )?;
        if changed == 0 {
            return Err(Error::DeviceNotFound(device_id.to_string()));
        }
        Ok(())
    }

    /// Sets (or clears) a device's push registration token.
    pub fn set_fcm_token(&self, device_id: &str, token: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE devices SET fcm_token = ?2 WHERE id = ?1",
            params![device_id, token],
        )?;
        if changed == 0 {
            return Err(Error::DeviceNotFound(device_id.to_string()));
        }
        Ok(())
    }

    // ---- handshakes ----

    /// Persists a new handshake ticket.
    pub fn insert_handshake(&self, handshake: &Handshake) -> Result<()> {
        let payload = serde_json::to_string(&handshake.payload)?;
        self.conn.execute(
            "INSERT INTO handshakes (
                id, user_id, from_device, to_device, payload,
                created_at_ms, expires_at_ms, consumed, consumed_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                handshake.id,
                handshake.user_id,
                handshake.from_device,
                handshake.to_device,
                payload,
                handshake.created_at_ms,
                handshake.expires_at_ms,
                handshake.consumed,
                handshake.consumed_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Fetches a handshake by id.
    pub fn get_handshake(&self, id: &str) -> Result<Handshake> {
        self.conn
            .query_row(
                "SELECT id, user_id, from_device, to_device, payload,
                        created_at_ms, expires_at_ms, consumed, consumed_at_ms
                 FROM handshakes WHERE id = ?1",
                params![id],
                |row| {
                    let payload: String = row.get(4)?;
                    let payload: HandoffPayload = parse_payload(&payload, "payload")?;
                    Ok(Handshake {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        from_device: row.get(2)?,
                        to_device: row.get(3)?,
                        payload,
                        created_at_ms: row.get(5)?,
                        expires_at_ms: row.get(6)?,
                        consumed: row.get(7)?,
                        consumed_at_ms: row.get(8)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| Error::HandshakeNotFound(id.to_string()))
    }

    /// Flips `consumed` to true, exactly once.
    ///
    /// Returns true if this call won the transition, false if some other
    /// caller already consumed the handshake. The `consumed = 0` guard in
    /// the UPDATE is what makes two racing consumers safe.
    pub fn mark_handshake_consumed(&self, id: &str, now_ms: u64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE handshakes SET consumed = 1, consumed_at_ms = ?2
             WHERE id = ?1 AND consumed = 0",
            params![id, now_ms],
        )?;
        Ok(changed == 1)
    }

    /// Deletes up to `limit` handshakes whose expiry has passed.
    ///
    /// Returns the number deleted. Safe to run redundantly or concurrently:
    /// expired handshakes are terminal, deletion is pure cleanup.
    pub fn delete_expired_handshakes(&self, now_ms: u64, limit: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM handshakes WHERE id IN (
                SELECT id FROM handshakes WHERE expires_at_ms < ?1 LIMIT ?2
             )",
            params![now_ms, limit],
        )?;
        Ok(deleted)
    }

    // ---- device queues (indexed backend) ----

    /// Inserts a queue item for a device.
    pub fn insert_queue_item(&self, device_id: &str, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;
        self.conn.execute(
            "INSERT INTO queue_items (device_id, id, kind, payload, created_at_ms, retries, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                device_id,
                item.id,
                item.kind,
                payload,
                item.created_at_ms,
                item.retries,
                item.error,
            ],
        )?;
        Ok(())
    }

    /// Removes and returns the oldest queue item for a device.
    ///
    /// Read and delete happen inside one transaction so a crash between
    /// them cannot hand the same item out twice.
    pub fn pop_oldest_queue_item(&mut self, device_id: &str) -> Result<Option<QueueItem>> {
        let tx = self.conn.transaction()?;

        let item = tx
            .query_row(
                "SELECT id, kind, payload, created_at_ms, retries, error
                 FROM queue_items WHERE device_id = ?1
                 ORDER BY created_at_ms ASC, id ASC LIMIT 1",
                params![device_id],
                Self::row_to_queue_item,
            )
            .optional()?;

        if let Some(ref item) = item {
            tx.execute(
                "DELETE FROM queue_items WHERE device_id = ?1 AND id = ?2",
                params![device_id, item.id],
            )?;
        }

        tx.commit()?;
        Ok(item)
    }

    fn row_to_queue_item(row: &rusqlite::Row<'_>) -> std::result::Result<QueueItem, rusqlite::Error> {
        let payload: String = row.get(2)?;
        Ok(QueueItem {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: parse_payload(&payload, "payload")?,
            created_at_ms: row.get(3)?,
            retries: row.get(4)?,
            error: row.get(5)?,
        })
    }

    /// Lists a device's pending items, oldest first.
    pub fn list_queue_items(&self, device_id: &str) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, payload, created_at_ms, retries, error
             FROM queue_items WHERE device_id = ?1
             ORDER BY created_at_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![device_id], Self::row_to_queue_item)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Removes a specific queue item. Returns true if it existed.
    pub fn remove_queue_item(&self, device_id: &str, id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM queue_items WHERE device_id = ?1 AND id = ?2",
            params![device_id, id],
        )?;
        Ok(changed == 1)
    }

    /// Removes all pending items for a device.
    pub fn clear_queue(&self, device_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM queue_items WHERE device_id = ?1", params![device_id])?;
        Ok(())
    }

    /// Number of pending items for a device.
    pub fn count_queue_items(&self, device_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM queue_items WHERE device_id = ?1",
            params![device_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Advances the background-consumer cursor for a device queue.
    ///
    /// The cursor never moves backward: an advance carrying an older
    /// creation time than the recorded one is silently kept at the newer
    /// position.
    pub fn advance_queue_cursor(
        &self,
        device_id: &str,
        item_id: &str,
        item_created_at_ms: u64,
        now_ms: u64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO queue_cursors (device_id, processed_cursor, cursor_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(device_id) DO UPDATE SET
                processed_cursor = excluded.processed_cursor,
                cursor_ms = excluded.cursor_ms,
                updated_at_ms = excluded.updated_at_ms
             WHERE excluded.cursor_ms > queue_cursors.cursor_ms",
            params![device_id, item_id, item_created_at_ms, now_ms],
        )?;
        Ok(())
    }

    /// Returns the id of the last item a background consumer acted on.
    pub fn get_queue_cursor(&self, device_id: &str) -> Result<Option<String>> {
        let cursor: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT processed_cursor FROM queue_cursors WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
