use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use rama::telemetry::tracing;
use tokio::sync::{Notify, mpsc};

use crate::{
    run_state::RunState,
    runner::{IterationContext, IterationId, IterationOutcome, IterationRunner, WorkerId},
};

/// Lifecycle of a single worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for work.
    Idle,
    /// Performing an iteration.
    Running,
    /// Asked to stop; finishes its in-flight iteration first.
    Terminating,
    /// Stopped, waiting to be removed from the pool.
    Terminated,
}

const BUSY: u8 = 0b001;
const TERMINATE: u8 = 0b010;
const DONE: u8 = 0b100;

/// State shared between a worker task and its pool.
///
/// All flags live in one atomic so that "am I asked to stop" and "I stop"
/// is a single transition, which allows the pool to revive a terminating
/// worker without racing its exit.
#[derive(Debug, Default)]
pub(super) struct WorkerShared {
    flags: AtomicU8,
    wake: Notify,
}

impl WorkerShared {
    pub(super) fn state(&self) -> WorkerState {
        let flags = self.flags.load(Ordering::Acquire);
        if flags & DONE != 0 {
            WorkerState::Terminated
        } else if flags & TERMINATE != 0 {
            WorkerState::Terminating
        } else if flags & BUSY != 0 {
            WorkerState::Running
        } else {
            WorkerState::Idle
        }
    }

    pub(super) fn is_live(&self) -> bool {
        self.flags.load(Ordering::Acquire) & (TERMINATE | DONE) == 0
    }

    pub(super) fn is_busy(&self) -> bool {
        self.flags.load(Ordering::Acquire) & BUSY != 0
    }

    pub(super) fn is_done(&self) -> bool {
        self.flags.load(Ordering::Acquire) & DONE != 0
    }

    /// Claim an idle, live worker for one dispatched iteration.
    pub(super) fn try_claim(&self) -> bool {
        self.flags
            .compare_exchange(0, BUSY, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(super) fn unclaim(&self) {
        self.flags.fetch_and(!BUSY, Ordering::AcqRel);
    }

    pub(super) fn terminate(&self) {
        self.flags.fetch_or(TERMINATE, Ordering::AcqRel);
        self.wake.notify_one();
    }

    /// Undo [`Self::terminate`]; fails if the worker already stopped.
    pub(super) fn try_revive(&self) -> bool {
        self.flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
                (flags & DONE == 0).then_some(flags & !TERMINATE)
            })
            .is_ok()
    }

    /// Stop if asked to and not busy.
    fn try_finish(&self) -> bool {
        self.flags
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
                (flags & TERMINATE != 0 && flags & BUSY == 0).then_some(flags | DONE)
            })
            .is_ok()
    }

    /// Either stop (if asked to) or mark as busy for a self-pulled iteration.
    fn finish_or_claim(&self) -> bool {
        let previous = self.flags.fetch_update(Ordering::AcqRel, Ordering::Acquire, |flags| {
            Some(if flags & TERMINATE != 0 {
                flags | DONE
            } else {
                flags | BUSY
            })
        });
        matches!(previous, Ok(flags) if flags & TERMINATE != 0)
    }

    fn mark_done(&self) {
        self.flags.fetch_or(DONE, Ordering::AcqRel);
    }
}

/// Worker task body.
///
/// Without `tickets` the worker pulls its own iterations back to back.
/// With `tickets` it only runs iterations handed to it by the pool.
pub(super) async fn run_worker<R: IterationRunner>(
    id: WorkerId,
    shared: Arc<WorkerShared>,
    mut tickets: Option<mpsc::Receiver<IterationId>>,
    runner: Arc<R>,
    run_state: Arc<RunState>,
) {
    tracing::trace!(worker = %id, "worker started");

    loop {
        let iteration = match tickets.as_mut() {
            None => {
                if shared.finish_or_claim() {
                    break;
                }
                run_state.next_iteration()
            }
            Some(rx) => {
                if shared.try_finish() {
                    break;
                }
                tokio::select! {
                    biased;

                    maybe_ticket = rx.recv() => {
                        let Some(iteration) = maybe_ticket else {
                            shared.mark_done();
                            break;
                        };
                        iteration
                    }

                    _ = shared.wake.notified() => continue,
                }
            }
        };

        run_state.iteration_started();
        let ctx = IterationContext {
            id: iteration,
            worker: id,
        };
        let task_runner = runner.clone();

        // a panicking runner only takes down its iteration task
        match tokio::spawn(async move { task_runner.run(ctx).await }).await {
            Ok(outcome) => {
                match &outcome {
                    IterationOutcome::Success => (),
                    IterationOutcome::CheckFailure(reason) => {
                        tracing::debug!(worker = %id, iteration, %reason, "iteration check failed")
                    }
                    IterationOutcome::TransportError(reason) => {
                        tracing::debug!(worker = %id, iteration, %reason, "iteration transport error")
                    }
                }
                run_state.record_outcome(&outcome);
            }
            Err(err) => {
                tracing::error!(worker = %id, iteration, "iteration task failed: {err}");
                run_state.record_panic(true);
            }
        }
        shared.unclaim();

        if tickets.is_none() {
            // back to back iterations of a runner that never awaits
            // should not starve the rest of the runtime
            tokio::task::yield_now().await;
        }
    }

    tracing::trace!(worker = %id, "worker terminated");
}
