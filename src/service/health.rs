//! Traversal and broadcast counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the service loop.
///
/// All fields use atomic operations so the loop and request threads can
/// update them without the display-subsystem lock.
pub struct ServiceHealth {
    /// Transaction windows that ran
    pub traversals: AtomicU64,

    /// Devices that had pending changes applied, summed over all windows
    pub devices_applied: AtomicU64,

    /// Device events handed to the display registry
    pub events_broadcast: AtomicU64,

    /// Requests that were rejected with an error
    pub rejected_requests: AtomicU64,

    /// Unix microseconds of the last transaction window
    pub last_traversal_time: AtomicU64,
}

fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or_default()
}

impl ServiceHealth {
    pub fn new() -> Self {
        Self {
            traversals: AtomicU64::new(0),
            devices_applied: AtomicU64::new(0),
            events_broadcast: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            last_traversal_time: AtomicU64::new(0),
        }
    }

    pub fn record_traversal(&self, devices_applied: usize) {
        self.last_traversal_time.store(now_micros(), Ordering::Relaxed);
        self.traversals.fetch_add(1, Ordering::Relaxed);
        self.devices_applied
            .fetch_add(devices_applied as u64, Ordering::Relaxed);
    }

    pub fn record_events(&self, count: usize) {
        self.events_broadcast.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traversals(&self) -> u64 {
        self.traversals.load(Ordering::Relaxed)
    }

    pub fn devices_applied(&self) -> u64 {
        self.devices_applied.load(Ordering::Relaxed)
    }

    pub fn events_broadcast(&self) -> u64 {
        self.events_broadcast.load(Ordering::Relaxed)
    }

    pub fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }

    pub fn last_traversal_time(&self) -> u64 {
        self.last_traversal_time.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            traversals: self.traversals(),
            devices_applied: self.devices_applied(),
            events_broadcast: self.events_broadcast(),
            rejected_requests: self.rejected_requests(),
            last_traversal_micros: self.last_traversal_time(),
        }
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub traversals: u64,
    pub devices_applied: u64,
    pub events_broadcast: u64,
    pub rejected_requests: u64,
    /// Unix microseconds, zero before the first window
    pub last_traversal_micros: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} traversals ({} device updates), {} events, {} rejected requests",
            self.traversals, self.devices_applied, self.events_broadcast, self.rejected_requests
        )
    }
}
