use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use lattix_core::error::{LattixError, Result};
use lattix_core::types::ExecutionId;
use lattix_graph::WorkflowGraph;

use crate::runner::NodeRunner;

/// One queued unit of work: a validated graph plus the execution it belongs to.
pub struct RunJob {
    pub execution_id: ExecutionId,
    pub graph: WorkflowGraph,
    pub initial_input: Value,
}

/// Bounded FIFO of pending run jobs.
///
/// `push` waits when the buffer is full, so a burst of `start_execution`
/// calls backpressures instead of piling up unbounded.
pub struct RunQueue {
    tx: mpsc::Sender<RunJob>,
}

impl RunQueue {
    /// Create a queue and the receiver its workers consume.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn push(&self, job: RunJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| LattixError::Queue("run queue closed".to_string()))
    }
}

/// Fixed set of worker tasks draining the run queue.
///
/// Workers share one receiver behind a mutex; whichever is idle takes the
/// next job. Cancellation only interrupts the idle wait: a job already in
/// hand runs to completion, and jobs still queued at shutdown stay pending.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        workers: usize,
        rx: mpsc::Receiver<RunJob>,
        runner: Arc<NodeRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);

        for worker in 0..count {
            let rx = rx.clone();
            let runner = runner.clone();
            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                debug!(worker, "run worker started");
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = worker_cancel.cancelled() => None,
                            job = rx.recv() => job,
                        }
                    };
                    let Some(job) = job else { break };

                    debug!(worker, execution_id = %job.execution_id, "picked up run job");
                    runner.run(job).await;
                }
                debug!(worker, "run worker stopped");
            }));
        }

        Self { handles, cancel }
    }

    /// Signal shutdown and wait for every worker to wind down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_core::types::WorkflowId;
    use serde_json::json;

    fn job(id: i64) -> RunJob {
        RunJob {
            execution_id: ExecutionId(id),
            graph: WorkflowGraph::new(WorkflowId(1)),
            initial_input: json!({}),
        }
    }

    #[tokio::test]
    async fn test_push_and_receive_in_order() {
        let (queue, mut rx) = RunQueue::new(4);
        queue.push(job(1)).await.unwrap();
        queue.push(job(2)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().execution_id, ExecutionId(1));
        assert_eq!(rx.recv().await.unwrap().execution_id, ExecutionId(2));
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped_is_queue_error() {
        let (queue, rx) = RunQueue::new(4);
        drop(rx);

        let err = queue.push(job(1)).await.unwrap_err();
        assert!(matches!(err, LattixError::Queue(_)));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        // mpsc panics on capacity 0, so the queue clamps to 1.
        let (queue, mut rx) = RunQueue::new(0);
        queue.push(job(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().execution_id, ExecutionId(1));
    }
}
