//! The light command scheduler.
//!
//! Once per tick the engine submits the intents of every active effect. The
//! scheduler resolves conflicts per fixture, then hands each fixture its
//! newest command over a watch channel: one worker task per fixture
//! rate-limits, deduplicates, retries with bounded exponential backoff and
//! eventually degrades that one fixture. Fixtures are fully isolated, so a
//! dead lamp never delays a healthy one, while commands within a fixture
//! stay strictly ordered: a stale command can never follow a newer one.

use crate::error::{ControlError, Result};
use crate::fixture::{FixtureAdapter, FixtureCapabilities, FixtureInfo, LightCommand};
use crate::stats::EngineStats;
use luxbeat_core::{FixtureId, LightIntent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Scheduler tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Override every fixture's advertised minimum command interval
    pub min_command_interval_override: Option<Duration>,
    /// Maximum color delta below which two commands are identical
    pub dedup_tolerance: f32,
    /// Failed-send retries before a fixture is degraded
    pub retry_cap: u32,
    /// First retry backoff; doubles per retry
    pub backoff_base: Duration,
    /// Backoff ceiling
    pub backoff_max: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_command_interval_override: None,
            dedup_tolerance: 0.01,
            retry_cap: 3,
            backoff_base: Duration::from_millis(50),
            backoff_max: Duration::from_secs(1),
        }
    }
}

/// Delivery state machine of one fixture.
///
/// `Idle -> Sending -> {Idle, Backoff -> Sending | Degraded}`. `Degraded`
/// exits only through an explicit reconnect signal from discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureStatus {
    /// Nothing in flight
    Idle,
    /// A send is in progress
    Sending,
    /// Waiting before a retry
    Backoff,
    /// Gave up; commands are dropped until a reconnect signal
    Degraded,
}

/// Per-fixture delivery bookkeeping, mutated only by that fixture's worker
/// (plus the reconnect signal)
#[derive(Debug, Clone)]
struct FixtureState {
    status: FixtureStatus,
    last_sent: Option<LightCommand>,
    retries: u32,
}

impl FixtureState {
    fn new() -> Self {
        Self {
            status: FixtureStatus::Idle,
            last_sent: None,
            retries: 0,
        }
    }
}

/// Newest pending command for one fixture. `seq` forces a watch
/// notification even if an identical command is submitted again.
#[derive(Debug, Clone)]
struct PendingSlot {
    seq: u64,
    command: Option<LightCommand>,
}

struct FixtureEntry {
    capabilities: FixtureCapabilities,
    tx: watch::Sender<PendingSlot>,
    state: Arc<Mutex<FixtureState>>,
    worker: Option<JoinHandle<()>>,
}

/// Merges per-effect intents into a rate-limited, deduplicated command
/// stream across all fixtures.
pub struct CommandScheduler<A: FixtureAdapter> {
    adapter: Arc<A>,
    entries: HashMap<FixtureId, FixtureEntry>,
    config: SchedulerConfig,
    stats: Arc<EngineStats>,
}

impl<A: FixtureAdapter> CommandScheduler<A> {
    /// Build a scheduler and spawn one worker per fixture.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        adapter: Arc<A>,
        fixtures: &[FixtureInfo],
        config: SchedulerConfig,
        stats: Arc<EngineStats>,
    ) -> Self {
        let mut entries = HashMap::new();
        for info in fixtures {
            let (tx, rx) = watch::channel(PendingSlot {
                seq: 0,
                command: None,
            });
            let state = Arc::new(Mutex::new(FixtureState::new()));
            let worker = tokio::spawn(fixture_worker(
                info.id.clone(),
                info.capabilities,
                config.clone(),
                Arc::clone(&adapter),
                Arc::clone(&state),
                rx,
                Arc::clone(&stats),
            ));
            entries.insert(
                info.id.clone(),
                FixtureEntry {
                    capabilities: info.capabilities,
                    tx,
                    state,
                    worker: Some(worker),
                },
            );
        }
        info!(fixtures = entries.len(), "command scheduler started");
        Self {
            adapter,
            entries,
            config,
            stats,
        }
    }

    /// Submit one tick's worth of intents.
    ///
    /// Conflicting intents for the same fixture resolve to the highest
    /// priority; on equal priority the most recently submitted intent wins.
    pub fn submit(&self, intents: &[LightIntent]) {
        let mut winners: HashMap<&FixtureId, &LightIntent> = HashMap::new();
        for intent in intents {
            match winners.get(&intent.fixture) {
                Some(current) if intent.priority < current.priority => {}
                _ => {
                    winners.insert(&intent.fixture, intent);
                }
            }
        }

        for (id, intent) in winners {
            let Some(entry) = self.entries.get(id) else {
                trace!(fixture = %id, "intent for unknown fixture dropped");
                continue;
            };
            let command = LightCommand {
                color: intent.color,
                transition: intent.transition,
            }
            .respecting(&entry.capabilities);

            entry.tx.send_modify(|slot| {
                slot.seq += 1;
                slot.command = Some(command);
            });
        }
    }

    /// Current delivery status of a fixture
    pub fn status(&self, id: &FixtureId) -> Option<FixtureStatus> {
        self.entries.get(id).map(|e| e.state.lock().status)
    }

    /// Color last accepted by the fixture, if any
    pub fn last_sent(&self, id: &FixtureId) -> Option<LightCommand> {
        self.entries
            .get(id)
            .and_then(|e| e.state.lock().last_sent.clone())
    }

    /// External rediscovery/reconnect signal: take a degraded fixture back
    /// to `Idle` so delivery resumes on the next submit.
    pub fn mark_reconnected(&self, id: &FixtureId) -> Result<()> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| ControlError::UnknownFixture(id.to_string()))?;
        let mut state = entry.state.lock();
        if state.status == FixtureStatus::Degraded {
            info!(fixture = %id, "fixture reconnected");
        }
        state.status = FixtureStatus::Idle;
        state.retries = 0;
        Ok(())
    }

    /// The adapter behind this scheduler
    pub fn adapter(&self) -> &Arc<A> {
        &self.adapter
    }

    /// Shared counters
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }

    /// The active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Stop all workers, letting any in-flight send finish first.
    pub async fn shutdown(mut self) {
        let mut workers = Vec::new();
        for (_, mut entry) in self.entries.drain() {
            if let Some(worker) = entry.worker.take() {
                workers.push(worker);
            }
            // Dropping the sender here closes the channel and ends the
            // worker loop once its current command is done.
        }
        for worker in workers {
            let _ = worker.await;
        }
        debug!("command scheduler stopped");
    }
}

/// One fixture's delivery loop: consume the newest pending command,
/// rate-limit, dedup, send with bounded retries.
async fn fixture_worker<A: FixtureAdapter>(
    id: FixtureId,
    capabilities: FixtureCapabilities,
    config: SchedulerConfig,
    adapter: Arc<A>,
    state: Arc<Mutex<FixtureState>>,
    mut rx: watch::Receiver<PendingSlot>,
    stats: Arc<EngineStats>,
) {
    let min_interval = config
        .min_command_interval_override
        .unwrap_or(capabilities.min_command_interval);
    let mut last_sent_at: Option<Instant> = None;

    while rx.changed().await.is_ok() {
        let Some(mut command) = rx.borrow_and_update().command.clone() else {
            continue;
        };

        if state.lock().status == FixtureStatus::Degraded {
            stats.inc_commands_dropped();
            continue;
        }

        // Rate limit per fixture; a newer command arriving while we wait
        // simply replaces this one.
        if let Some(at) = last_sent_at {
            let ready = at + min_interval;
            if Instant::now() < ready {
                sleep_until(ready).await;
                if let Some(newer) = rx.borrow_and_update().command.clone() {
                    command = newer;
                }
            }
        }

        // Dedup against the fixture's last accepted state
        let duplicate = state
            .lock()
            .last_sent
            .as_ref()
            .map(|prev| prev.approx_eq(&command, config.dedup_tolerance))
            .unwrap_or(false);
        if duplicate {
            stats.inc_commands_suppressed();
            continue;
        }

        let mut attempt: u32 = 0;
        loop {
            state.lock().status = FixtureStatus::Sending;
            match adapter.send(&id, &command).await {
                Ok(()) => {
                    let mut s = state.lock();
                    s.status = FixtureStatus::Idle;
                    s.retries = 0;
                    s.last_sent = Some(command.clone());
                    drop(s);
                    last_sent_at = Some(Instant::now());
                    stats.inc_commands_sent();
                    break;
                }
                Err(err) => {
                    stats.inc_dispatch_failures();
                    attempt += 1;
                    if attempt > config.retry_cap {
                        let mut s = state.lock();
                        s.status = FixtureStatus::Degraded;
                        s.retries = attempt;
                        drop(s);
                        stats.inc_fixtures_degraded();
                        warn!(fixture = %id, error = %err, attempts = attempt, "fixture degraded");
                        break;
                    }
                    {
                        let mut s = state.lock();
                        s.status = FixtureStatus::Backoff;
                        s.retries = attempt;
                    }
                    let backoff =
                        (config.backoff_base * 2u32.pow(attempt - 1)).min(config.backoff_max);
                    debug!(fixture = %id, error = %err, attempt, ?backoff, "send failed, backing off");
                    sleep(backoff).await;
                    // Retry whatever is newest at this point.
                    if let Some(newer) = rx.borrow_and_update().command.clone() {
                        command = newer;
                    }
                }
            }
        }
    }
}
