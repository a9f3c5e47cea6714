//! Worker pool serving filesystem requests
//!
//! Requests are queued on a flume channel and drained by a fixed number of
//! tokio tasks. Worker `i` always runs as `ContextId(i)`, so the session the
//! pool builds for it is reused for every request that worker serves and
//! never shared with another worker.

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use common::session::{Context, ContextId, SessionError, SessionPool};

/// Serves one kind of job on behalf of a worker.
#[async_trait::async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    /// Serve `job` as `ctx`. When the worker has no usable session `ctx`
    /// carries the error and the handler must still answer the requester.
    async fn handle(&self, job: J, ctx: Result<Context, SessionError>);
}

/// Returned by [`JobDispatcher::dispatch`] once every worker is gone,
/// handing the job back so its requester can be answered.
pub struct Closed<J>(pub J);

impl<J> fmt::Debug for Closed<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Closed(..)")
    }
}

impl<J> fmt::Display for Closed<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("worker pool has shut down")
    }
}

impl<J> std::error::Error for Closed<J> {}

/// Cloneable sending half of the job queue.
pub struct JobDispatcher<J> {
    tx: flume::Sender<J>,
}

impl<J> Clone for JobDispatcher<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<J> fmt::Debug for JobDispatcher<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl<J: Send + 'static> JobDispatcher<J> {
    /// Spawn `workers` tasks on the current runtime, all pulling from one
    /// queue. The workers stop once every dispatcher has been dropped and
    /// the queue is drained.
    pub fn start<H: JobHandler<J>>(
        workers: usize,
        pool: Arc<SessionPool>,
        handler: Arc<H>,
    ) -> (Self, WorkerPool) {
        let (tx, rx) = flume::unbounded();
        let handles = (0..workers.max(1))
            .map(|i| {
                let id = ContextId(i as u64);
                tokio::spawn(run_worker(id, rx.clone(), pool.clone(), handler.clone()))
            })
            .collect();
        (Self { tx }, WorkerPool { handles })
    }

    /// Queue a job. Never blocks, so it may be called from FUSE threads.
    pub fn dispatch(&self, job: J) -> Result<(), Closed<J>> {
        self.tx.send(job).map_err(|e| Closed(e.into_inner()))
    }
}

async fn run_worker<J, H>(
    id: ContextId,
    rx: flume::Receiver<J>,
    pool: Arc<SessionPool>,
    handler: Arc<H>,
) where
    J: Send + 'static,
    H: JobHandler<J>,
{
    tracing::debug!(context = %id, "worker started");
    while let Ok(job) = rx.recv_async().await {
        let ctx = pool.context(id);
        if let Err(e) = &ctx {
            tracing::error!(context = %id, "no session for worker: {}", e);
        }
        handler.handle(job, ctx).await;
    }
    tracing::debug!(context = %id, "worker stopped");
}

/// Join handles of the spawned workers.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("worker panicked: {}", e);
            }
        }
    }
}
