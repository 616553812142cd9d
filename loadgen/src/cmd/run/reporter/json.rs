use loadgen_lib::{RunSnapshot, RunStatus, RunSummary};

use super::{Progress, Reporter};

#[derive(Debug, Default)]
pub struct JsonlReporter {
    last: RunSnapshot,
}

impl JsonlReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn progress_line(&mut self, status: &RunStatus) -> serde_json::Value {
        let progress = Progress::between(&self.last, &status.snapshot);
        self.last = status.snapshot;

        serde_json::json!({
            "type": "progress",
            "ips": progress.rate(),
            "interval": {
                "dispatched": progress.dispatched,
                "completed": progress.completed,
                "errors": progress.errors,
                "dropped": progress.dropped,
            },
            "total": status,
        })
    }

    fn summary_line(summary: &RunSummary) -> serde_json::Value {
        serde_json::json!({
            "type": "final",
            "total": summary,
        })
    }
}

impl Reporter for JsonlReporter {
    fn on_tick(&mut self, status: &RunStatus) {
        println!("{}", self.progress_line(status));
    }

    fn finish(&mut self, summary: &RunSummary) {
        println!("{}", Self::summary_line(summary));
    }
}
