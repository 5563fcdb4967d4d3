//! Scheduler behavior under virtual time: dedup, rate limiting, conflict
//! resolution, retry/degrade and fixture isolation.

use luxbeat_control::{
    CommandScheduler, DispatchError, EngineStats, FixtureAdapter, FixtureInfo, FixtureStatus,
    LightCommand, SchedulerConfig,
};
use luxbeat_core::{Color, EffectId, FixtureId, LightIntent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Records every accepted send; fails while a fixture is on the blocklist.
#[derive(Default)]
struct FlakyAdapter {
    calls: Mutex<Vec<(FixtureId, Instant, LightCommand)>>,
    failing: Mutex<HashSet<FixtureId>>,
}

impl FlakyAdapter {
    fn fail(&self, id: &str) {
        self.failing.lock().insert(id.into());
    }

    fn heal(&self, id: &str) {
        self.failing.lock().remove(&FixtureId::from(id));
    }

    fn calls_for(&self, id: &str) -> Vec<(Instant, LightCommand)> {
        let id = FixtureId::from(id);
        self.calls
            .lock()
            .iter()
            .filter(|(f, _, _)| *f == id)
            .map(|(_, at, c)| (*at, c.clone()))
            .collect()
    }
}

impl FixtureAdapter for FlakyAdapter {
    fn send(
        &self,
        fixture: &FixtureId,
        command: &LightCommand,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send {
        let result = if self.failing.lock().contains(fixture) {
            Err(DispatchError::new("fixture offline"))
        } else {
            self.calls
                .lock()
                .push((fixture.clone(), Instant::now(), command.clone()));
            Ok(())
        };
        std::future::ready(result)
    }
}

fn intent(fixture: &str, brightness: f32, priority: i32) -> LightIntent {
    LightIntent {
        fixture: fixture.into(),
        color: Color::hsb(0.5, 1.0, brightness),
        transition: Duration::from_millis(100),
        priority,
        source_effect: EffectId::new("fx"),
    }
}

fn scheduler(
    adapter: &Arc<FlakyAdapter>,
    fixtures: &[&str],
    config: SchedulerConfig,
) -> (CommandScheduler<FlakyAdapter>, Arc<EngineStats>) {
    let stats = Arc::new(EngineStats::default());
    let infos: Vec<FixtureInfo> = fixtures.iter().map(|f| FixtureInfo::new(*f)).collect();
    let sched = CommandScheduler::new(Arc::clone(adapter), &infos, config, Arc::clone(&stats));
    (sched, stats)
}

#[tokio::test(start_paused = true)]
async fn near_identical_commands_collapse_to_one_send() {
    let adapter = Arc::new(FlakyAdapter::default());
    let (sched, stats) = scheduler(&adapter, &["lamp-1"], SchedulerConfig::default());

    sched.submit(&[intent("lamp-1", 0.8, 0)]);
    sleep(Duration::from_millis(100)).await;
    // Within the 0.01 dedup tolerance of the last sent state.
    sched.submit(&[intent("lamp-1", 0.8005, 0)]);
    sleep(Duration::from_millis(200)).await;

    assert_eq!(adapter.calls_for("lamp-1").len(), 1);
    let snap = stats.snapshot();
    assert_eq!(snap.commands_sent, 1);
    assert_eq!(snap.commands_suppressed, 1);
    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn rate_limit_sends_newest_and_skips_stale() {
    let adapter = Arc::new(FlakyAdapter::default());
    let (sched, _stats) = scheduler(&adapter, &["lamp-1"], SchedulerConfig::default());

    sched.submit(&[intent("lamp-1", 0.2, 0)]);
    sleep(Duration::from_millis(1)).await;
    sched.submit(&[intent("lamp-1", 0.5, 0)]);
    sleep(Duration::from_millis(1)).await;
    sched.submit(&[intent("lamp-1", 0.9, 0)]);
    sleep(Duration::from_millis(200)).await;

    let calls = adapter.calls_for("lamp-1");
    assert_eq!(calls.len(), 2, "intermediate command must be skipped");
    assert!((calls[0].1.color.brightness - 0.2).abs() < 1e-6);
    assert!((calls[1].1.color.brightness - 0.9).abs() < 1e-6);
    let gap = calls[1].0 - calls[0].0;
    assert!(gap >= Duration::from_millis(50), "gap was {gap:?}");
    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn highest_priority_wins_and_ties_go_to_latest() {
    let adapter = Arc::new(FlakyAdapter::default());
    let (sched, _stats) = scheduler(&adapter, &["lamp-1"], SchedulerConfig::default());

    sched.submit(&[
        intent("lamp-1", 0.1, 0),
        intent("lamp-1", 0.5, 5),
        intent("lamp-1", 0.9, 5),
    ]);
    sleep(Duration::from_millis(100)).await;

    let calls = adapter.calls_for("lamp-1");
    assert_eq!(calls.len(), 1);
    assert!((calls[0].1.color.brightness - 0.9).abs() < 1e-6);
    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failing_fixture_degrades_while_healthy_one_keeps_running() {
    let adapter = Arc::new(FlakyAdapter::default());
    adapter.fail("dead");
    let (sched, stats) = scheduler(&adapter, &["dead", "alive"], SchedulerConfig::default());

    sched.submit(&[intent("dead", 0.8, 0), intent("alive", 0.8, 0)]);
    sleep(Duration::from_secs(1)).await;

    // retry_cap 3 means four attempts total before giving up.
    assert_eq!(sched.status(&"dead".into()), Some(FixtureStatus::Degraded));
    assert_eq!(sched.status(&"alive".into()), Some(FixtureStatus::Idle));
    assert_eq!(adapter.calls_for("alive").len(), 1);
    let snap = stats.snapshot();
    assert_eq!(snap.dispatch_failures, 4);
    assert_eq!(snap.fixtures_degraded, 1);

    // Degraded fixtures drop commands; the healthy one still updates.
    sched.submit(&[intent("dead", 0.3, 0), intent("alive", 0.3, 0)]);
    sleep(Duration::from_millis(200)).await;
    assert!(adapter.calls_for("dead").is_empty());
    assert_eq!(adapter.calls_for("alive").len(), 2);
    assert_eq!(stats.snapshot().commands_dropped, 1);
    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_signal_revives_a_degraded_fixture() {
    let adapter = Arc::new(FlakyAdapter::default());
    adapter.fail("lamp-1");
    let (sched, _stats) = scheduler(&adapter, &["lamp-1"], SchedulerConfig::default());

    sched.submit(&[intent("lamp-1", 0.8, 0)]);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sched.status(&"lamp-1".into()), Some(FixtureStatus::Degraded));

    adapter.heal("lamp-1");
    sched.mark_reconnected(&"lamp-1".into()).unwrap();
    sched.submit(&[intent("lamp-1", 0.4, 0)]);
    sleep(Duration::from_millis(200)).await;

    let calls = adapter.calls_for("lamp-1");
    assert_eq!(calls.len(), 1);
    assert!((calls[0].1.color.brightness - 0.4).abs() < 1e-6);
    assert_eq!(sched.status(&"lamp-1".into()), Some(FixtureStatus::Idle));
    sched.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unknown_fixture_reconnect_is_an_error() {
    let adapter = Arc::new(FlakyAdapter::default());
    let (sched, _stats) = scheduler(&adapter, &["lamp-1"], SchedulerConfig::default());
    assert!(sched.mark_reconnected(&"ghost".into()).is_err());
    sched.shutdown().await;
}
