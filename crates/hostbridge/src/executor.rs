//! Designated execution context for UI-affine handlers.
//!
//! Calls flagged with UI affinity must not overlap and must run in arrival
//! order. Hosts with a real UI dispatcher implement [`ExecutionContext`]
//! over it; [`SerialContext`] is the built-in FIFO runner.

use std::panic::AssertUnwindSafe;
use std::sync::OnceLock;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error("execution context is shut down")]
    Closed,
    #[error("no async runtime available to start the execution context")]
    NoRuntime,
}

pub trait ExecutionContext: Send + Sync + 'static {
    /// Queue a job. Jobs run in submission order, one at a time.
    fn submit(&self, job: Job) -> Result<(), ContextError>;
}

/// Single-task FIFO executor, started on first use.
#[derive(Default)]
pub struct SerialContext {
    queue: OnceLock<mpsc::UnboundedSender<Job>>,
}

impl SerialContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn start() -> Result<mpsc::UnboundedSender<Job>, ContextError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ContextError::NoRuntime)?;
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            tracing::trace!("Serial execution context started");
            while let Some(job) = rx.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    tracing::error!("Job panicked on serial execution context");
                }
            }
            tracing::trace!("Serial execution context stopped");
        });
        Ok(tx)
    }
}

impl ExecutionContext for SerialContext {
    fn submit(&self, job: Job) -> Result<(), ContextError> {
        let queue = match self.queue.get() {
            Some(queue) => queue,
            None => {
                let started = Self::start()?;
                // A concurrent first submit may have won; its runner is the one kept.
                self.queue.get_or_init(|| started)
            }
        };
        queue.send(job).map_err(|_| ContextError::Closed)
    }
}
