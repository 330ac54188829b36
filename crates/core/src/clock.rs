// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Injected clock and id generation.
//!
//! Every timestamp comparison in the engine (LWW resolution, handshake
//! expiry, queue ordering) flows through a single [`ClockSource`], so tests
//! can drive time deterministically and embedders can supply a platform
//! clock. Devices without synchronized clocks will see skewed LWW and
//! expiry decisions; that is a documented limitation of the collaborating
//! time source, not something corrected here.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Trait for getting the current wall clock time.
///
/// This allows injecting a mock clock for testing.
pub trait ClockSource: Send + Sync {
    /// Returns the current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> u64;
}

/// System clock implementation using `std::time::SystemTime`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

impl<C: ClockSource> ClockSource for &C {
    fn now_ms(&self) -> u64 {
        (*self).now_ms()
    }
}

/// A controllable clock for deterministic tests.
///
/// Starts at a fixed time and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    time_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given epoch-ms time.
    pub fn new(initial_ms: u64) -> Self {
        ManualClock { time_ms: AtomicU64::new(initial_ms) }
    }

    /// Sets the clock to an absolute epoch-ms time.
    pub fn set(&self, ms: u64) {
        self.time_ms.store(ms, AtomicOrdering::SeqCst);
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, ms: u64) {
        self.time_ms.fetch_add(ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(AtomicOrdering::SeqCst)
    }
}

/// Number of random base-36 characters in a generated id suffix.
const ID_SUFFIX_LEN: usize = 7;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates an id of the form `{epoch_ms}-{rand36}`.
///
/// The timestamp prefix makes ids sort in creation order within one
/// process, which is what FIFO retrieval relies on. The random suffix only
/// avoids collisions between items created in the same millisecond; ids are
/// not globally unique across processes.
pub fn generate_id<C: ClockSource + ?Sized>(clock: &C) -> String {
    let mut rng = rand::thread_rng();
    let mut suffix = String::with_capacity(ID_SUFFIX_LEN);
    for _ in 0..ID_SUFFIX_LEN {
        suffix.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
    }
    format!("{}-{}", clock.now_ms(), suffix)
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
