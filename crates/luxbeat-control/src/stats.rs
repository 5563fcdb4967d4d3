//! Observable counters for recoverable errors and delivery outcomes.
//!
//! Recoverable faults never propagate across component boundaries; they are
//! counted here so the host can log or export them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters, updated by the analysis thread, sync intake and
/// scheduler workers.
#[derive(Debug, Default)]
pub struct EngineStats {
    frames_analyzed: AtomicU64,
    analysis_faults: AtomicU64,
    sync_events: AtomicU64,
    sync_rejects: AtomicU64,
    commands_sent: AtomicU64,
    commands_suppressed: AtomicU64,
    commands_dropped: AtomicU64,
    dispatch_failures: AtomicU64,
    fixtures_degraded: AtomicU64,
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames successfully analyzed
    pub frames_analyzed: u64,
    /// Frames skipped due to numerical faults
    pub analysis_faults: u64,
    /// Sync events accepted
    pub sync_events: u64,
    /// Sync messages rejected as invalid
    pub sync_rejects: u64,
    /// Commands delivered to adapters
    pub commands_sent: u64,
    /// Commands suppressed as duplicates
    pub commands_suppressed: u64,
    /// Commands dropped (degraded fixture)
    pub commands_dropped: u64,
    /// Individual delivery failures (including retried ones)
    pub dispatch_failures: u64,
    /// Times a fixture entered the degraded state
    pub fixtures_degraded: u64,
}

impl EngineStats {
    pub(crate) fn inc_frames_analyzed(&self) {
        self.frames_analyzed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_analysis_faults(&self) {
        self.analysis_faults.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_sync_events(&self) {
        self.sync_events.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_sync_rejects(&self) {
        self.sync_rejects.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_commands_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_commands_suppressed(&self) {
        self.commands_suppressed.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_commands_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_dispatch_failures(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_fixtures_degraded(&self) {
        self.fixtures_degraded.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            analysis_faults: self.analysis_faults.load(Ordering::Relaxed),
            sync_events: self.sync_events.load(Ordering::Relaxed),
            sync_rejects: self.sync_rejects.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_suppressed: self.commands_suppressed.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            fixtures_degraded: self.fixtures_degraded.load(Ordering::Relaxed),
        }
    }
}
