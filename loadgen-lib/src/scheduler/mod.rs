//! Drives a [`WorkerPool`] through a [`LoadProfile`] over wall-clock time.
//!
//! A run moves through `NotStarted -> Running -> Draining -> Completed`.
//! While running, a single timer-driven task ticks at a fixed interval and
//! on every tick either resizes the pool to the ramp target (stage ramp) or
//! dispatches the iterations that came due since the previous tick
//! (arrival rate). Because that one task is the only one touching the pool,
//! all resize and dispatch decisions are totally ordered by tick.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing,
};
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    pool::{Feed, NoIdleWorker, WorkerPool},
    profile::{ArrivalSchedule, LoadProfile, StageRamp},
    run_state::{RunSnapshot, RunState},
    runner::IterationRunner,
};

/// What to do when the scheduler falls behind by one or more ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOverrunPolicy {
    /// Perform the work of the missed ticks as part of the late tick.
    #[default]
    Coalesce,
    /// Drop the work of the missed ticks. Iterations that came due during
    /// them are recorded as a shortfall.
    Skip,
}

impl TickOverrunPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            TickOverrunPolicy::Coalesce => "coalesce",
            TickOverrunPolicy::Skip => "skip",
        }
    }
}

impl fmt::Display for TickOverrunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TickOverrunPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coalesce" => Ok(TickOverrunPolicy::Coalesce),
            "skip" => Ok(TickOverrunPolicy::Skip),
            other => Err(format!(
                "unknown tick overrun policy '{other}', expected 'coalesce' or 'skip'"
            )),
        }
    }
}

/// Tuning of the scheduler, independent of the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tick interval, clamped to `[1ms, 1s]`.
    pub tick: Duration,
    pub overrun: TickOverrunPolicy,
    /// Optional cap on the pool size on top of the profile's own bound.
    pub worker_limit: Option<usize>,
}

impl SchedulerConfig {
    pub const MIN_TICK: Duration = Duration::from_millis(1);
    pub const MAX_TICK: Duration = Duration::from_secs(1);
    pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

    fn effective_tick(&self) -> Duration {
        self.tick.clamp(Self::MIN_TICK, Self::MAX_TICK)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Self::DEFAULT_TICK,
            overrun: TickOverrunPolicy::default(),
            worker_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    NotStarted,
    Running,
    Draining,
    Completed,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SchedulerState::NotStarted,
            1 => SchedulerState::Running,
            2 => SchedulerState::Draining,
            _ => SchedulerState::Completed,
        }
    }
}

/// Current state of a run, see [`LoadTest::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub state: SchedulerState,
    #[serde(flatten)]
    pub snapshot: RunSnapshot,
}

/// Outcome of a completed run, see [`LoadTest::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub state: SchedulerState,
    /// The run was stopped before the profile was over.
    pub cancelled: bool,
    #[serde(flatten)]
    pub snapshot: RunSnapshot,
}

struct Shared {
    state: AtomicU8,
    run_state: Arc<RunState>,
    stop: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        tracing::debug!(?state, "scheduler state transition");
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Handle to a single load-test run.
///
/// Dropping the handle does not stop the run.
pub struct LoadTest {
    shared: Arc<Shared>,
    task: JoinHandle<RunSummary>,
}

impl fmt::Debug for LoadTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTest")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl LoadTest {
    /// Start a run of `profile`, with `runner` performing every iteration.
    ///
    /// Has to be called from within a tokio runtime.
    pub fn start<R: IterationRunner>(
        profile: LoadProfile,
        runner: R,
        config: SchedulerConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(SchedulerState::NotStarted as u8),
            run_state: Arc::new(RunState::new()),
            stop,
        });

        let task = tokio::spawn(run_scheduler(
            profile,
            Arc::new(runner),
            config,
            shared.clone(),
        ));

        Self { shared, task }
    }

    /// Cancel the run: skip whatever is left of the profile and drain.
    pub fn stop(&self) {
        if !self.shared.stop.send_replace(true) {
            tracing::info!(state = ?self.shared.state(), "load test stop requested");
        }
    }

    pub fn status(&self) -> RunStatus {
        RunStatus {
            state: self.shared.state(),
            snapshot: self.shared.run_state.snapshot(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to complete.
    pub async fn wait(self) -> Result<RunSummary, BoxError> {
        Ok(self.task.await.context("join load test scheduler task")?)
    }
}

async fn run_scheduler<R: IterationRunner>(
    profile: LoadProfile,
    runner: Arc<R>,
    config: SchedulerConfig,
    shared: Arc<Shared>,
) -> RunSummary {
    let run_state = shared.run_state.clone();
    let mut stop_rx = shared.stop.subscribe();

    let max_workers = match config.worker_limit {
        Some(limit) => limit.min(profile.max_workers()),
        None => profile.max_workers(),
    };
    let feed = match profile {
        LoadProfile::StageRamp(_) => Feed::Loop,
        LoadProfile::ArrivalRate(_) => Feed::Dispatch,
    };
    let mut pool = WorkerPool::new(runner, run_state.clone(), max_workers, feed);

    let cancelled = if *stop_rx.borrow_and_update() {
        tracing::info!("load test stopped before it started");
        true
    } else {
        shared.set_state(SchedulerState::Running);

        let tick = config.effective_tick();
        tracing::info!(
            profile = profile.kind(),
            duration = ?profile.total_duration(),
            %max_workers,
            ?tick,
            overrun = %config.overrun,
            "load test running",
        );

        let driver = match &profile {
            LoadProfile::StageRamp(ramp) => Driver::Ramp(RampDriver {
                ramp: ramp.clone(),
                last_target: None,
            }),
            LoadProfile::ArrivalRate(arrival) => {
                if let Err(err) = pool.resize(arrival.spec().pre_allocated) {
                    tracing::warn!("pre-allocate workers: {err}");
                    run_state.record_pool_exhausted();
                }
                Driver::Arrival(ArrivalDriver {
                    schedule: arrival.schedule(),
                    accounted: 0,
                    shortfall_reported: false,
                })
            }
        };

        let mut ticker = Ticker {
            pool: &mut pool,
            run_state: &run_state,
            driver,
            tick,
            overrun: config.overrun,
            total: profile.total_duration(),
            last_seq: None,
        };
        ticker.run(&mut stop_rx).await
    };

    shared.set_state(SchedulerState::Draining);
    pool.drain_and_stop().await;
    run_state.set_target(0);
    run_state.mark_finished();
    shared.set_state(SchedulerState::Completed);

    let snapshot = run_state.snapshot();
    tracing::info!(
        cancelled,
        elapsed = ?snapshot.elapsed,
        dispatched = snapshot.dispatched,
        errors = snapshot.errors(),
        shortfall_events = snapshot.shortfall_events,
        "load test completed",
    );

    RunSummary {
        state: SchedulerState::Completed,
        cancelled,
        snapshot,
    }
}

struct Ticker<'a, R> {
    pool: &'a mut WorkerPool<R>,
    run_state: &'a RunState,
    driver: Driver,
    tick: Duration,
    overrun: TickOverrunPolicy,
    total: Duration,
    last_seq: Option<u64>,
}

enum Driver {
    Ramp(RampDriver),
    Arrival(ArrivalDriver),
}

impl<R: IterationRunner> Ticker<'_, R> {
    /// Tick until the profile is over (`false`) or the run got stopped (`true`).
    async fn run(&mut self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        let start = self.run_state.started();
        let deadline = tokio::time::sleep_until(start + self.total);
        let mut deadline = std::pin::pin!(deadline);

        let mut interval = tokio::time::interval_at(start, self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = stop_rx.changed() => {
                    if result.is_err() || *stop_rx.borrow_and_update() {
                        tracing::info!("load test cancelled: drain");
                        return true;
                    }
                }

                _ = deadline.as_mut() => {
                    tracing::debug!("load test profile is over: drain");
                    self.finish();
                    return false;
                }

                _ = interval.tick() => {
                    self.on_tick(start);
                }
            }
        }
    }

    fn on_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed().min(self.total);
        let seq = (elapsed.as_nanos() / self.tick.as_nanos()) as u64;

        let missed = match self.last_seq {
            Some(last) => seq.saturating_sub(last + 1),
            None => seq,
        };
        self.last_seq = Some(seq);

        if missed > 0 {
            tracing::warn!(
                seq,
                missed,
                policy = %self.overrun,
                "scheduler fell behind: tick overrun",
            );
            self.run_state.record_late_ticks(missed);
        }

        tracing::trace!(seq, ?elapsed, "scheduler tick");

        match &mut self.driver {
            Driver::Ramp(driver) => driver.on_tick(&mut *self.pool, self.run_state, elapsed),
            Driver::Arrival(driver) => {
                if missed > 0 && self.overrun == TickOverrunPolicy::Skip {
                    let window_start = u32::try_from(seq - 1)
                        .ok()
                        .and_then(|n| self.tick.checked_mul(n))
                        .unwrap_or(self.total);
                    driver.skip_until(self.run_state, window_start);
                }
                driver.dispatch_due(&mut *self.pool, self.run_state, elapsed);
            }
        }
    }

    /// Account for the tail end of the profile.
    fn finish(&mut self) {
        if let Driver::Arrival(driver) = &mut self.driver {
            driver.dispatch_due(&mut *self.pool, self.run_state, self.total);
        }
    }
}

struct RampDriver {
    ramp: StageRamp,
    last_target: Option<usize>,
}

impl RampDriver {
    fn on_tick<R: IterationRunner>(
        &mut self,
        pool: &mut WorkerPool<R>,
        run_state: &RunState,
        elapsed: Duration,
    ) {
        let target = self.ramp.target_at(elapsed).unwrap_or_default();
        if self.last_target != Some(target) {
            tracing::debug!(%target, ?elapsed, "ramp target changed");
            self.last_target = Some(target);
        }

        run_state.set_target(target);
        if let Err(err) = pool.resize(target) {
            tracing::debug!("resize worker pool: {err}");
            run_state.record_pool_exhausted();
        }
    }
}

struct ArrivalDriver {
    schedule: ArrivalSchedule,
    /// Iterations due so far that were either dispatched or given up on.
    accounted: u64,
    shortfall_reported: bool,
}

impl ArrivalDriver {
    fn skip_until(&mut self, run_state: &RunState, until: Duration) {
        let skipped = self.schedule.due_at(until).saturating_sub(self.accounted);
        if skipped > 0 {
            tracing::warn!(skipped, "skip iterations of missed ticks");
            self.accounted += skipped;
            run_state.record_shortfall(skipped);
        }
    }

    fn dispatch_due<R: IterationRunner>(
        &mut self,
        pool: &mut WorkerPool<R>,
        run_state: &RunState,
        elapsed: Duration,
    ) {
        // free the slots of workers that died since the last tick
        pool.reap();

        let due = self.schedule.due_at(elapsed);
        let budget = due.saturating_sub(self.accounted);
        self.accounted = self.accounted.max(due);

        let mut dispatched = 0;
        while dispatched < budget {
            match pool.dispatch_one() {
                Ok(_) => dispatched += 1,
                Err(NoIdleWorker) => {
                    if pool.len() < pool.max_workers() && pool.resize(pool.live() + 1).is_ok() {
                        continue;
                    }
                    run_state.record_pool_exhausted();
                    break;
                }
            }
        }

        run_state.set_target(pool.live());

        let shortfall = budget - dispatched;
        if shortfall > 0 {
            run_state.record_shortfall(shortfall);
            if self.shortfall_reported {
                tracing::debug!(shortfall, "arrival rate shortfall");
            } else {
                self.shortfall_reported = true;
                tracing::warn!(
                    shortfall,
                    max_workers = pool.max_workers(),
                    "arrival rate shortfall: not enough idle workers to sustain the rate",
                );
            }
        }
    }
}
