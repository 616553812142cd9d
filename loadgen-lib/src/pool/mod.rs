//! A bounded, resizable pool of workers ("virtual users").

use std::{fmt, sync::Arc};

use rama::telemetry::tracing;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    run_state::RunState,
    runner::{IterationId, IterationRunner, WorkerId},
};

mod worker;

pub use self::worker::WorkerState;
use self::worker::{WorkerShared, run_worker};

/// Where workers get their iterations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Workers pull iterations back to back, as fast as the runner allows.
    Loop,
    /// Workers wait for iterations handed out by [`WorkerPool::dispatch_one`].
    Dispatch,
}

struct Worker {
    id: WorkerId,
    shared: Arc<WorkerShared>,
    tickets: Option<mpsc::Sender<IterationId>>,
    task: JoinHandle<()>,
}

/// Pool of workers, all running iterations of the same runner.
///
/// The pool itself is not shared: whoever owns it (the scheduler) is the
/// only one adding and removing workers. Workers only ever look at their
/// own state.
///
/// Guarantees:
/// - the amount of workers, including the ones still finishing their last
///   iteration, never exceeds `max_workers`;
/// - a worker never runs two iterations at once;
/// - a worker asked to stop always completes its in-flight iteration.
pub struct WorkerPool<R> {
    runner: Arc<R>,
    run_state: Arc<RunState>,
    feed: Feed,
    max_workers: usize,
    workers: Vec<Worker>,
    next_worker_id: u64,
    dispatch_cursor: usize,
}

impl<R> fmt::Debug for WorkerPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("feed", &self.feed)
            .field("max_workers", &self.max_workers)
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl<R: IterationRunner> WorkerPool<R> {
    pub fn new(runner: Arc<R>, run_state: Arc<RunState>, max_workers: usize, feed: Feed) -> Self {
        Self {
            runner,
            run_state,
            feed,
            max_workers,
            workers: Vec::with_capacity(max_workers),
            next_worker_id: 0,
            dispatch_cursor: 0,
        }
    }

    pub fn feed(&self) -> Feed {
        self.feed
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers that are not asked to stop.
    pub fn live(&self) -> usize {
        self.workers.iter().filter(|w| w.shared.is_live()).count()
    }

    /// All workers that still occupy a slot: live and terminating ones.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_states(&self) -> Vec<(WorkerId, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.id, w.shared.state()))
            .collect()
    }

    /// Adjust the amount of live workers towards `target`.
    ///
    /// Scaling up first revives workers that are still finishing their last
    /// iteration, then spawns new ones. Scaling down stops idle workers
    /// before busy ones; busy workers are never interrupted.
    ///
    /// Returns the amount of live workers after the adjustment, or
    /// [`PoolExhausted`] if `target` exceeds `max_workers`, in which case the
    /// pool is grown up to its maximum.
    pub fn resize(&mut self, target: usize) -> Result<usize, PoolExhausted> {
        self.reap();

        let bounded = target.min(self.max_workers);
        let live = self.live();

        if bounded > live {
            let mut missing = bounded - live;

            for worker in &self.workers {
                if missing == 0 {
                    break;
                }
                if !worker.shared.is_live() && worker.shared.try_revive() {
                    tracing::trace!(worker = %worker.id, "revived terminating worker");
                    missing -= 1;
                }
            }

            // revivals can lose the race against a worker that just stopped
            self.reap();

            while missing > 0 && self.workers.len() < self.max_workers {
                self.spawn_worker();
                missing -= 1;
            }
        } else if bounded < live {
            let mut excess = live - bounded;

            for busy in [false, true] {
                for worker in self.workers.iter().rev() {
                    if excess == 0 {
                        break;
                    }
                    if worker.shared.is_live() && worker.shared.is_busy() == busy {
                        worker.shared.terminate();
                        excess -= 1;
                    }
                }
            }
        }

        let live = self.live();
        self.run_state.set_workers(live);

        if live < target {
            Err(PoolExhausted {
                requested: target,
                live,
            })
        } else {
            Ok(live)
        }
    }

    /// Hand one iteration to an idle worker.
    ///
    /// Only pools fed by [`Feed::Dispatch`] have workers waiting for
    /// iterations; a [`Feed::Loop`] pool always reports [`NoIdleWorker`].
    pub fn dispatch_one(&mut self) -> Result<IterationId, NoIdleWorker> {
        let count = self.workers.len();
        for offset in 0..count {
            let index = (self.dispatch_cursor + offset) % count;
            let worker = &self.workers[index];

            let Some(tickets) = worker.tickets.as_ref() else {
                continue;
            };
            if tickets.is_closed() || !worker.shared.try_claim() {
                continue;
            }

            let iteration = self.run_state.next_iteration();
            if let Err(err) = tickets.try_send(iteration) {
                // only possible if the worker died in between
                tracing::debug!(worker = %worker.id, iteration, "failed to hand out iteration: {err}");
                worker.shared.unclaim();
                continue;
            }

            self.dispatch_cursor = (index + 1) % count;
            return Ok(iteration);
        }

        Err(NoIdleWorker)
    }

    /// Stop all workers and wait until each of them finished its in-flight
    /// iteration.
    pub async fn drain_and_stop(&mut self) {
        tracing::debug!(workers = self.workers.len(), "draining worker pool");

        for worker in &self.workers {
            worker.shared.terminate();
        }

        for worker in self.workers.drain(..) {
            if let Err(err) = worker.task.await {
                let in_flight = worker.shared.is_busy();
                tracing::error!(worker = %worker.id, "worker task failed: {err}");
                self.run_state.record_panic(in_flight);
            }
        }

        self.run_state.set_workers(0);
        tracing::debug!("worker pool drained");
    }

    /// Remove stopped workers, accounting for the ones that died.
    pub fn reap(&mut self) {
        let run_state = &self.run_state;
        self.workers.retain(|worker| {
            if !worker.task.is_finished() {
                return true;
            }
            if !worker.shared.is_done() {
                // the task ended without passing through its exit path
                tracing::error!(worker = %worker.id, "worker task died unexpectedly");
                run_state.record_panic(worker.shared.is_busy());
            }
            false
        });

        if self.dispatch_cursor >= self.workers.len() {
            self.dispatch_cursor = 0;
        }
    }

    fn spawn_worker(&mut self) {
        let id = WorkerId(self.next_worker_id);
        self.next_worker_id += 1;

        let shared = Arc::new(WorkerShared::default());
        let (tickets, rx) = match self.feed {
            Feed::Loop => (None, None),
            Feed::Dispatch => {
                let (tx, rx) = mpsc::channel(1);
                (Some(tx), Some(rx))
            }
        };

        let task = tokio::spawn(run_worker(
            id,
            shared.clone(),
            rx,
            self.runner.clone(),
            self.run_state.clone(),
        ));

        tracing::trace!(worker = %id, "spawned worker");
        self.workers.push(Worker {
            id,
            shared,
            tickets,
            task,
        });
    }
}

impl<R> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        // workers finish their in-flight iteration on their own
        for worker in &self.workers {
            worker.shared.terminate();
        }
    }
}

/// The pool could not grow to the requested size.
///
/// Not fatal: it means the load could not be sustained as specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolExhausted {
    pub requested: usize,
    pub live: usize,
}

impl fmt::Display for PoolExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PoolExhausted: requested {} workers, only {} available",
            self.requested, self.live
        )
    }
}

impl std::error::Error for PoolExhausted {}

/// All workers are busy (or the pool is empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoIdleWorker;

impl fmt::Display for NoIdleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoIdleWorker: no worker available to dispatch to")
    }
}

impl std::error::Error for NoIdleWorker {}
