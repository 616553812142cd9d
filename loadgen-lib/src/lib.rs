#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

pub mod http;
pub mod pool;
pub mod profile;
pub mod run_state;
pub mod runner;
pub mod scheduler;
pub mod utils;

pub use self::{
    pool::{NoIdleWorker, PoolExhausted, WorkerPool},
    profile::{InvalidProfile, LoadProfile, ProfilePreset},
    run_state::{RunSnapshot, RunState},
    runner::{IterationContext, IterationOutcome, IterationRunner},
    scheduler::{
        LoadTest, RunStatus, RunSummary, SchedulerConfig, SchedulerState, TickOverrunPolicy,
    },
};
