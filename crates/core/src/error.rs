// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for tether-core operations.

use thiserror::Error;

/// All possible errors that can occur in tether-core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InvalidInput(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("handshake not found: {0}")]
    HandshakeNotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("handshake expired: {0}\n  hint: re-initiate the handoff from the source device")]
    HandshakeExpired(String),

    #[error("handshake already consumed: {0}\n  hint: each handoff can be opened on the target device only once")]
    HandshakeConsumed(String),

    #[error("invalid device type: '{0}'\n  hint: valid types are: web, desktop, mobile")]
    InvalidDeviceType(String),

    #[error("invalid platform: '{0}'\n  hint: valid platforms are: mac, win, linux, ios, android, web")]
    InvalidPlatform(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupted data: {0}")]
    CorruptedData(String),
}

impl Error {
    /// Returns a stable, machine-readable code for this error.
    ///
    /// Business-rule failures keep distinct codes so callers (and UIs) can
    /// branch on them without matching message strings.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) | Error::InvalidDeviceType(_) | Error::InvalidPlatform(_) => {
                "invalid-argument"
            }
            Error::DeviceNotFound(_) | Error::HandshakeNotFound(_) => "not-found",
            Error::PermissionDenied(_) => "permission-denied",
            Error::HandshakeExpired(_) | Error::HandshakeConsumed(_) => "failed-precondition",
            Error::Storage(_) | Error::Rpc(_) => "unavailable",
            Error::Database(_) | Error::Io(_) | Error::Json(_) | Error::CorruptedData(_) => {
                "internal"
            }
        }
    }
}

/// A specialized Result type for tether-core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
