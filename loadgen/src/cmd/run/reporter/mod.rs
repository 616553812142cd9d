use loadgen_lib::{RunSnapshot, RunStatus, RunSummary};

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + Sync + 'static {
    fn on_tick(&mut self, status: &RunStatus);
    fn finish(&mut self, summary: &RunSummary);
}

/// Progress made between two snapshots of the same run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub secs: f64,
    pub dispatched: u64,
    pub completed: u64,
    pub errors: u64,
    pub dropped: u64,
}

impl Progress {
    pub fn between(previous: &RunSnapshot, current: &RunSnapshot) -> Self {
        Self {
            secs: current
                .elapsed
                .saturating_sub(previous.elapsed)
                .as_secs_f64(),
            dispatched: current.dispatched.saturating_sub(previous.dispatched),
            completed: current.completed().saturating_sub(previous.completed()),
            errors: current.errors().saturating_sub(previous.errors()),
            dropped: current
                .dropped_iterations
                .saturating_sub(previous.dropped_iterations),
        }
    }

    /// Completed iterations per second.
    pub fn rate(&self) -> f64 {
        if self.secs == 0. {
            0.
        } else {
            self.completed as f64 / self.secs
        }
    }
}
