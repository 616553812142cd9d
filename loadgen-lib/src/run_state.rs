//! Counters of a single load-test run.

use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

use crate::runner::{IterationId, IterationOutcome};

/// Run scoped state, shared between the scheduler, its workers and
/// whoever wants to observe the run.
///
/// Gauges (`target`, `workers`) are written by the scheduler only.
/// Counters are incremented concurrently by workers, always with a single
/// atomic `fetch_add`.
#[derive(Debug)]
pub struct RunState {
    started: Instant,
    finished_after: AtomicU64,

    target: AtomicUsize,
    workers: AtomicUsize,
    in_flight: AtomicUsize,

    dispatched: AtomicU64,
    successes: AtomicU64,
    check_failures: AtomicU64,
    transport_errors: AtomicU64,
    panics: AtomicU64,

    shortfall_events: AtomicU64,
    dropped_iterations: AtomicU64,
    pool_exhausted_events: AtomicU64,
    late_ticks: AtomicU64,
}

const NOT_FINISHED: u64 = u64::MAX;

impl RunState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            finished_after: AtomicU64::new(NOT_FINISHED),
            target: AtomicUsize::new(0),
            workers: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            dispatched: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            check_failures: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            panics: AtomicU64::new(0),
            shortfall_events: AtomicU64::new(0),
            dropped_iterations: AtomicU64::new(0),
            pool_exhausted_events: AtomicU64::new(0),
            late_ticks: AtomicU64::new(0),
        }
    }

    /// Time since the run started, frozen once the run is finished.
    pub fn elapsed(&self) -> Duration {
        match self.finished_after.load(Ordering::Acquire) {
            NOT_FINISHED => self.started.elapsed(),
            nanos => Duration::from_nanos(nanos),
        }
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    pub(crate) fn mark_finished(&self) {
        let nanos = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(NOT_FINISHED - 1);
        let _ = self.finished_after.compare_exchange(
            NOT_FINISHED,
            nanos,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn set_target(&self, target: usize) {
        self.target.store(target, Ordering::Release);
    }

    pub(crate) fn set_workers(&self, workers: usize) {
        self.workers.store(workers, Ordering::Release);
    }

    /// Reserve the id of a new iteration and count it as dispatched.
    pub(crate) fn next_iteration(&self) -> IterationId {
        self.dispatched.fetch_add(1, Ordering::AcqRel)
    }

    pub(crate) fn iteration_started(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_outcome(&self, outcome: &IterationOutcome) {
        let counter = match outcome {
            IterationOutcome::Success => &self.successes,
            IterationOutcome::CheckFailure(_) => &self.check_failures,
            IterationOutcome::TransportError(_) => &self.transport_errors,
        };
        counter.fetch_add(1, Ordering::AcqRel);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// An iteration panicked, or the worker task running it died.
    pub(crate) fn record_panic(&self, in_flight: bool) {
        self.panics.fetch_add(1, Ordering::AcqRel);
        if in_flight {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    pub(crate) fn record_shortfall(&self, dropped: u64) {
        self.shortfall_events.fetch_add(1, Ordering::AcqRel);
        self.dropped_iterations.fetch_add(dropped, Ordering::AcqRel);
    }

    pub(crate) fn record_pool_exhausted(&self) {
        self.pool_exhausted_events.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_late_ticks(&self, missed: u64) {
        self.late_ticks.fetch_add(missed, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            elapsed: self.elapsed(),
            target: self.target.load(Ordering::Acquire),
            workers: self.workers.load(Ordering::Acquire),
            in_flight: self.in_flight.load(Ordering::Acquire),
            dispatched: self.dispatched.load(Ordering::Acquire),
            successes: self.successes.load(Ordering::Acquire),
            check_failures: self.check_failures.load(Ordering::Acquire),
            transport_errors: self.transport_errors.load(Ordering::Acquire),
            panics: self.panics.load(Ordering::Acquire),
            shortfall_events: self.shortfall_events.load(Ordering::Acquire),
            dropped_iterations: self.dropped_iterations.load(Ordering::Acquire),
            pool_exhausted_events: self.pool_exhausted_events.load(Ordering::Acquire),
            late_ticks: self.late_ticks.load(Ordering::Acquire),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point in time copy of a [`RunState`].
///
/// Counters are read one by one, so a snapshot taken while workers are
/// active is not a single consistent cut; it is once the run completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSnapshot {
    #[serde(serialize_with = "serialize_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
    pub target: usize,
    pub workers: usize,
    pub in_flight: usize,
    pub dispatched: u64,
    pub successes: u64,
    pub check_failures: u64,
    pub transport_errors: u64,
    pub panics: u64,
    pub shortfall_events: u64,
    pub dropped_iterations: u64,
    pub pool_exhausted_events: u64,
    pub late_ticks: u64,
}

impl RunSnapshot {
    /// Iterations that finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.successes + self.errors()
    }

    pub fn errors(&self) -> u64 {
        self.check_failures + self.transport_errors + self.panics
    }
}

fn serialize_millis<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_freezes_once_finished() {
        let state = RunState::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(state.elapsed(), Duration::from_secs(3));

        state.mark_finished();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(state.elapsed(), Duration::from_secs(3));

        // only the first call counts
        state.mark_finished();
        assert_eq!(state.snapshot().elapsed, Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counters_are_race_free() {
        const TASKS: u64 = 8;
        const PER_TASK: u64 = 1_000;

        let state = Arc::new(RunState::new());
        let handles: Vec<_> = (0..TASKS)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    for j in 0..PER_TASK {
                        state.next_iteration();
                        state.iteration_started();
                        let outcome = match (i + j) % 3 {
                            0 => IterationOutcome::Success,
                            1 => IterationOutcome::CheckFailure("status is 200".to_owned()),
                            _ => IterationOutcome::TransportError("refused".to_owned()),
                        };
                        state.record_outcome(&outcome);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = state.snapshot();
        assert_eq!(snapshot.dispatched, TASKS * PER_TASK);
        assert_eq!(snapshot.completed(), TASKS * PER_TASK);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(
            snapshot.errors(),
            snapshot.check_failures + snapshot.transport_errors
        );
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = RunSnapshot {
            elapsed: Duration::from_millis(1_500),
            dispatched: 3,
            successes: 2,
            transport_errors: 1,
            ..Default::default()
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["elapsed_ms"], 1500);
        assert_eq!(value["dispatched"], 3);
        assert_eq!(value["transport_errors"], 1);
    }
}
