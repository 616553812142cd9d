use loadgen_lib::{RunSnapshot, RunStatus, RunSummary};

use super::{Progress, Reporter};

#[derive(Debug, Default)]
pub struct HumanReporter {
    last: RunSnapshot,
}

impl HumanReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn progress_line(&mut self, status: &RunStatus) -> String {
        let snapshot = &status.snapshot;
        let progress = Progress::between(&self.last, snapshot);
        self.last = *snapshot;

        format!(
            "t={:.1}s state={:?} target={} workers={} in_flight={} ips={:.1} ok={} fail={} dropped={} total_ok={} total_fail={} total_dropped={}",
            snapshot.elapsed.as_secs_f64(),
            status.state,
            snapshot.target,
            snapshot.workers,
            snapshot.in_flight,
            progress.rate(),
            progress.completed - progress.errors,
            progress.errors,
            progress.dropped,
            snapshot.successes,
            snapshot.errors(),
            snapshot.dropped_iterations,
        )
    }

    fn summary_line(summary: &RunSummary) -> String {
        let snapshot = &summary.snapshot;
        format!(
            "done t={:.1}s cancelled={} dispatched={} ok={} check_fail={} transport_fail={} panics={} dropped={} shortfall_events={} pool_exhausted={} late_ticks={}",
            snapshot.elapsed.as_secs_f64(),
            summary.cancelled,
            snapshot.dispatched,
            snapshot.successes,
            snapshot.check_failures,
            snapshot.transport_errors,
            snapshot.panics,
            snapshot.dropped_iterations,
            snapshot.shortfall_events,
            snapshot.pool_exhausted_events,
            snapshot.late_ticks,
        )
    }
}

impl Reporter for HumanReporter {
    fn on_tick(&mut self, status: &RunStatus) {
        println!("{}", self.progress_line(status));
    }

    fn finish(&mut self, summary: &RunSummary) {
        println!("{}", Self::summary_line(summary));
    }
}
