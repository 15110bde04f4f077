//! Memory usage snapshots.
//!
//! A snapshot pairs the process resident set size with the pool counters.
//! The two are sampled one after the other without a global lock, so they
//! may be a few operations apart under load.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;

use crate::pool::{ClassStats, PoolManager};

/// Point-in-time view of process memory and pool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    /// Milliseconds since the Unix epoch when the snapshot was taken.
    pub captured_at: u64,
    /// Resident set size in bytes, where the platform exposes it.
    pub resident_bytes: Option<u64>,
    /// Per-class pool counters, ordered by capacity.
    pub classes: Vec<ClassStats>,
    /// Fallback allocations across all classes since construction.
    pub fallback_allocations: u64,
    /// Oversize buffers currently checked out.
    pub oversize_outstanding: usize,
    /// Oversize allocations since construction.
    pub oversize_allocations: u64,
}

impl MemorySnapshot {
    /// Buffers currently held by consumers.
    pub fn checked_out(&self) -> usize {
        self.classes.iter().map(|c| c.checked_out).sum::<usize>() + self.oversize_outstanding
    }

    /// Bytes held by pooled buffers, idle or checked out.
    pub fn pooled_bytes(&self) -> u64 {
        self.classes
            .iter()
            .map(|c| (c.pooled_total * c.capacity * std::mem::size_of::<u64>()) as u64)
            .sum()
    }

    /// Human-readable multi-line report.
    pub fn report(&self) -> String {
        self.to_string()
    }

    /// JSON rendering of the snapshot.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resident_bytes {
            Some(bytes) => writeln!(f, "resident: {} KiB", bytes / 1024)?,
            None => writeln!(f, "resident: unavailable")?,
        }
        writeln!(
            f,
            "{:>10} {:>8} {:>6} {:>8} {:>8} {:>10} {:>10}",
            "class", "ceiling", "idle", "in use", "pooled", "hits", "fallback"
        )?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>10} {:>8} {:>6} {:>8} {:>8} {:>10} {:>10}",
                class.capacity,
                class.ceiling,
                class.idle,
                class.checked_out,
                class.pooled_total,
                class.hits,
                class.fallback_allocations
            )?;
        }
        write!(
            f,
            "oversize: {} outstanding, {} allocated; pooled bytes: {}",
            self.oversize_outstanding,
            self.oversize_allocations,
            self.pooled_bytes()
        )
    }
}

/// Resident set size of the current process, in bytes.
pub fn resident_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        status
            .lines()
            .find(|line| line.starts_with("VmRSS:"))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Captures process memory and pool counters without touching pool state.
pub fn snapshot(pool: &PoolManager) -> MemorySnapshot {
    let resident_bytes = resident_bytes();
    let stats = pool.stats();
    let captured_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    MemorySnapshot {
        captured_at,
        resident_bytes,
        fallback_allocations: stats.fallback_allocations(),
        oversize_outstanding: stats.oversize_outstanding,
        oversize_allocations: stats.oversize_allocations,
        classes: stats.classes,
    }
}

/// Takes a snapshot and emits it as a structured `info` event.
pub fn report_memory_usage(pool: &PoolManager) -> MemorySnapshot {
    let snap = snapshot(pool);
    info!(
        resident_kb = snap.resident_bytes.map(|b| b / 1024),
        checked_out = snap.checked_out(),
        pooled_bytes = snap.pooled_bytes(),
        fallback_allocations = snap.fallback_allocations,
        oversize_allocations = snap.oversize_allocations,
        "memory usage"
    );
    for class in &snap.classes {
        info!(
            class = class.capacity,
            idle = class.idle,
            checked_out = class.checked_out,
            pooled_total = class.pooled_total,
            fallback = class.fallback_allocations,
            "pool class"
        );
    }
    snap
}
