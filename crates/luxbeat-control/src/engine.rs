//! Engine runtime wiring.
//!
//! [`LightEngine`] assembles the pure core pieces into a running system:
//!
//! - an analysis thread drains audio frames from a bounded channel, runs the
//!   spectral analyzer, publishes the newest [`BandEnergySet`] and feeds the
//!   beat estimator with onset energy;
//! - a sync intake task parses DJ protocol lines and applies beat events to
//!   the estimator;
//! - a tick loop at `tick_hz` snapshots the beat signal, ticks the effect
//!   engine and submits the resulting intents to the command scheduler.
//!
//! Audio cadence, sync cadence, tick cadence and per-fixture delivery are
//! all decoupled; the stages meet only through the frame channel, the
//! estimator mutex and latest-value snapshots, so a slow light can never
//! stall analysis and a silent deck can never stall the lights.

use crate::error::{ControlError, Result};
use crate::fixture::{FixtureAdapter, FixtureInfo};
use crate::scheduler::{CommandScheduler, FixtureStatus, SchedulerConfig};
use crate::stats::{EngineStats, StatsSnapshot};
use crate::sync::{parse_sync_message, SyncEvent};
use crossbeam_channel::RecvTimeoutError;
use luxbeat_core::{
    AudioFrame, BandEnergySet, BeatEstimator, BeatSignal, CoreConfig, CoreError, EffectEngine,
    EffectId, FixtureId, Latest, ParamValue, SpectralAnalyzer,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Capacity of the bounded audio frame channel. Holding more than a few
/// frames only adds latency; when the analyzer falls behind, frames are
/// dropped at the sender.
const FRAME_CHANNEL_CAPACITY: usize = 8;

/// Capacity of the sync line channel
const SYNC_CHANNEL_CAPACITY: usize = 64;

/// Full engine configuration: the core surface plus scheduler tuning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Analyzer, estimator, tick rate and effects
    #[serde(flatten)]
    pub core: CoreConfig,
    /// Command scheduler tuning
    pub scheduler: SchedulerConfig,
}

/// Format the audio source declares at startup.
///
/// The analyzer expects fixed-size frames at a fixed rate; a source that
/// cannot honor the configured format is rejected before anything spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channels per sample
    pub channels: u16,
    /// Samples per channel per frame
    pub frame_len: usize,
}

/// The assembled engine, ready to start.
pub struct LightEngine<A: FixtureAdapter> {
    config: EngineConfig,
    adapter: Arc<A>,
    fixtures: Vec<FixtureInfo>,
    analyzer: SpectralAnalyzer,
    effects: EffectEngine,
}

impl<A: FixtureAdapter> LightEngine<A> {
    /// Validate the configuration against the declared source format and
    /// build the engine. Fails fast on any mismatch: nothing is spawned and
    /// no command is ever sent from a misconfigured engine.
    pub fn new(
        config: EngineConfig,
        adapter: A,
        fixtures: Vec<FixtureInfo>,
        format: SourceFormat,
    ) -> Result<Self> {
        let analyzer = SpectralAnalyzer::new(config.core.analyzer.clone())?;

        let expected = &config.core.analyzer;
        if format.sample_rate != expected.sample_rate
            || format.channels != expected.channels
            || format.frame_len != expected.window_size
        {
            return Err(CoreError::ConfigMismatch(format!(
                "source {}Hz/{}ch/{} samples does not match configured {}Hz/{}ch/{} samples",
                format.sample_rate,
                format.channels,
                format.frame_len,
                expected.sample_rate,
                expected.channels,
                expected.window_size,
            ))
            .into());
        }
        if config.core.tick_hz == 0 {
            return Err(CoreError::ConfigMismatch("tick_hz must be nonzero".into()).into());
        }

        let effects = EffectEngine::new(config.core.effects.clone())?;
        Ok(Self {
            config,
            adapter: Arc::new(adapter),
            fixtures,
            analyzer,
            effects,
        })
    }

    /// Spawn the analysis thread, sync intake and tick loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> EngineHandle<A> {
        let stats = Arc::new(EngineStats::default());
        let scheduler = Arc::new(CommandScheduler::new(
            Arc::clone(&self.adapter),
            &self.fixtures,
            self.config.scheduler.clone(),
            Arc::clone(&stats),
        ));

        let energies = Arc::new(Latest::new());
        let signal = Arc::new(Latest::new());
        let estimator = Arc::new(Mutex::new(BeatEstimator::new(self.config.core.beat.clone())));
        let effects = Arc::new(Mutex::new(self.effects));
        let running = Arc::new(AtomicBool::new(true));
        let epoch = Instant::now();
        let wall_epoch = std::time::Instant::now();

        let (frame_tx, frame_rx) = crossbeam_channel::bounded(FRAME_CHANNEL_CAPACITY);
        let (sync_tx, sync_rx) = mpsc::channel(SYNC_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let analysis_thread = spawn_analysis_thread(
            self.analyzer,
            frame_rx,
            Arc::clone(&energies),
            Arc::clone(&estimator),
            Arc::clone(&stats),
            Arc::clone(&running),
            wall_epoch,
        );

        let sync_task = tokio::spawn(sync_intake(
            sync_rx,
            Arc::clone(&estimator),
            Arc::clone(&signal),
            Arc::clone(&stats),
            epoch,
            shutdown_tx.subscribe(),
        ));

        let tick_task = tokio::spawn(tick_loop(
            self.config.core.tick_hz,
            Arc::clone(&estimator),
            Arc::clone(&effects),
            Arc::clone(&energies),
            Arc::clone(&signal),
            Arc::clone(&scheduler),
            shutdown_rx,
            epoch,
        ));

        info!(
            fixtures = self.fixtures.len(),
            tick_hz = self.config.core.tick_hz,
            "light engine started"
        );

        EngineHandle {
            frame_tx,
            sync_tx,
            energies,
            signal,
            effects,
            scheduler,
            stats,
            running,
            shutdown_tx,
            tick_task,
            sync_task,
            analysis_thread,
        }
    }
}

/// Handle to a running engine: input senders, live controls and shutdown.
pub struct EngineHandle<A: FixtureAdapter> {
    frame_tx: crossbeam_channel::Sender<AudioFrame>,
    sync_tx: mpsc::Sender<String>,
    energies: Arc<Latest<BandEnergySet>>,
    signal: Arc<Latest<BeatSignal>>,
    effects: Arc<Mutex<EffectEngine>>,
    scheduler: Arc<CommandScheduler<A>>,
    stats: Arc<EngineStats>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    tick_task: JoinHandle<()>,
    sync_task: JoinHandle<()>,
    analysis_thread: thread::JoinHandle<()>,
}

impl<A: FixtureAdapter> EngineHandle<A> {
    /// Sender the audio source pushes frames into.
    ///
    /// The channel is bounded; when the analyzer falls behind, the source
    /// should `try_send` and drop the frame on a full channel.
    pub fn frame_sender(&self) -> crossbeam_channel::Sender<AudioFrame> {
        self.frame_tx.clone()
    }

    /// Sender the sync session pushes raw protocol lines into
    pub fn sync_sender(&self) -> mpsc::Sender<String> {
        self.sync_tx.clone()
    }

    /// Newest analyzed band energies, if any frame has been analyzed
    pub fn band_energies(&self) -> Option<Arc<BandEnergySet>> {
        self.energies.get()
    }

    /// Newest published beat signal
    pub fn beat_signal(&self) -> Option<Arc<BeatSignal>> {
        self.signal.get()
    }

    /// Enable or disable an effect while the engine runs
    pub fn set_effect_enabled(&self, id: &EffectId, enabled: bool) -> Result<()> {
        let mut effects = self.effects.lock();
        if !effects.contains(id) {
            return Err(ControlError::UnknownEffect(id.to_string()));
        }
        effects.set_enabled(id, enabled)?;
        Ok(())
    }

    /// Update an effect parameter while the engine runs
    pub fn set_effect_param(&self, id: &EffectId, name: &str, value: ParamValue) -> Result<()> {
        let mut effects = self.effects.lock();
        if !effects.contains(id) {
            return Err(ControlError::UnknownEffect(id.to_string()));
        }
        effects.set_param(id, name, value)?;
        Ok(())
    }

    /// Delivery status of one fixture
    pub fn fixture_status(&self, id: &FixtureId) -> Option<FixtureStatus> {
        self.scheduler.status(id)
    }

    /// Signal that a degraded fixture was rediscovered
    pub fn mark_fixture_reconnected(&self, id: &FixtureId) -> Result<()> {
        self.scheduler.mark_reconnected(id)
    }

    /// Snapshot of all counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop the engine: the tick loop stops submitting, in-flight sends
    /// complete, then analysis and intake wind down.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if self.tick_task.await.is_err() {
            warn!("tick loop ended abnormally");
        }

        // After the tick task dropped its clone we own the last reference.
        match Arc::into_inner(self.scheduler) {
            Some(scheduler) => scheduler.shutdown().await,
            None => warn!("scheduler still shared at shutdown; workers aborted"),
        }

        self.running.store(false, Ordering::Relaxed);
        drop(self.frame_tx);
        let analysis = self.analysis_thread;
        let _ = tokio::task::spawn_blocking(move || analysis.join()).await;

        drop(self.sync_tx);
        let _ = self.sync_task.await;
        info!("light engine stopped");
    }
}

/// Maps stream-position timestamps onto the engine clock.
///
/// The first observed stream time is pinned to the engine time it arrived
/// at; later timestamps advance by stream deltas. A capture source whose
/// sample counter does not start near zero therefore stays aligned with
/// the beat clock.
#[derive(Debug, Default)]
struct StreamClock {
    base: Option<(Duration, Duration)>,
}

impl StreamClock {
    fn rebase(&mut self, engine_now: Duration, stream_t: Duration) -> Duration {
        let (engine_first, stream_first) = *self.base.get_or_insert((engine_now, stream_t));
        engine_first + stream_t.saturating_sub(stream_first)
    }
}

fn spawn_analysis_thread(
    mut analyzer: SpectralAnalyzer,
    frame_rx: crossbeam_channel::Receiver<AudioFrame>,
    energies: Arc<Latest<BandEnergySet>>,
    estimator: Arc<Mutex<BeatEstimator>>,
    stats: Arc<EngineStats>,
    running: Arc<AtomicBool>,
    wall_epoch: std::time::Instant,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        debug!("analysis thread started");
        let mut clock = StreamClock::default();
        while running.load(Ordering::Relaxed) {
            let frame = match frame_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            match analyzer.analyze(&frame) {
                Ok(set) => {
                    stats.inc_frames_analyzed();
                    let stream_t = frame.start_time() + frame.duration();
                    let t = clock.rebase(wall_epoch.elapsed(), stream_t);
                    estimator.lock().on_audio_energy(&set, t);
                    energies.publish(set);
                }
                Err(err) => {
                    stats.inc_analysis_faults();
                    warn!(error = %err, position = frame.sample_position, "frame skipped");
                }
            }
        }
        debug!("analysis thread stopped");
    })
}

async fn sync_intake(
    mut sync_rx: mpsc::Receiver<String>,
    estimator: Arc<Mutex<BeatEstimator>>,
    signal: Arc<Latest<BeatSignal>>,
    stats: Arc<EngineStats>,
    epoch: Instant,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // The sync session usually still holds its sender at shutdown, so
        // intake must stop on the shutdown signal, not on channel closure.
        let line = tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = sync_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        match parse_sync_message(&line) {
            Ok(SyncEvent::Beat(event)) => {
                stats.inc_sync_events();
                let t = epoch.elapsed();
                let mut est = estimator.lock();
                est.on_beat_event(&event, t);
                signal.publish(est.current_signal(t));
            }
            Ok(SyncEvent::Command { id, value }) => {
                stats.inc_sync_events();
                debug!(id, value, "sync command received");
            }
            Ok(SyncEvent::Button {
                name,
                pressed,
                page,
            }) => {
                stats.inc_sync_events();
                debug!(name, pressed, ?page, "sync button received");
            }
            Err(err) => {
                stats.inc_sync_rejects();
                warn!(error = %err, "sync message rejected");
            }
        }
    }
    debug!("sync intake stopped");
}

#[allow(clippy::too_many_arguments)]
async fn tick_loop<A: FixtureAdapter>(
    tick_hz: u32,
    estimator: Arc<Mutex<BeatEstimator>>,
    effects: Arc<Mutex<EffectEngine>>,
    energies: Arc<Latest<BandEnergySet>>,
    signal: Arc<Latest<BeatSignal>>,
    scheduler: Arc<CommandScheduler<A>>,
    mut shutdown_rx: watch::Receiver<bool>,
    epoch: Instant,
) {
    let period = Duration::from_secs_f64(1.0 / f64::from(tick_hz));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let t = epoch.elapsed();
                let current = { estimator.lock().current_signal(t) };
                signal.publish(current.clone());

                let set = energies.get();
                let intents = effects.lock().tick(&current, set.as_deref(), period);
                scheduler.submit(&intents);
            }
        }
    }
    debug!("tick loop stopped");
}
