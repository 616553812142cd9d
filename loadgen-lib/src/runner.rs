//! The unit of work performed by workers.

use std::fmt;

/// Unique (per run) identifier of a single iteration.
pub type IterationId = u64;

/// Identifier of a worker within a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub(crate) u64);

impl WorkerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Iteration scoped context handed to the [`IterationRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    pub id: IterationId,
    pub worker: WorkerId,
}

/// Classified result of one iteration.
///
/// Only the classification is aggregated; the reasons end up in the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Success,
    /// The work was performed but a check on its result did not hold.
    CheckFailure(String),
    /// The work could not be performed (connect error, timeout, ...).
    TransportError(String),
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IterationOutcome::Success)
    }
}

/// Performs one iteration, e.g. an HTTP request and a check on its response.
///
/// A single runner is shared by all workers of a run, hence it is called
/// concurrently. It never fails the run: failures are classified in the
/// returned [`IterationOutcome`].
pub trait IterationRunner: Send + Sync + 'static {
    fn run(&self, ctx: IterationContext) -> impl Future<Output = IterationOutcome> + Send;
}

impl<F, Fut> IterationRunner for F
where
    F: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = IterationOutcome> + Send,
{
    fn run(&self, ctx: IterationContext) -> impl Future<Output = IterationOutcome> + Send {
        (self)(ctx)
    }
}
