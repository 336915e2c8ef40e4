//! Background execution of accepted generations.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use diagai_core::GenerationError;

use crate::orchestrator::Orchestrator;

/// Sending half of the work queue. Carries nothing but generation ids; the
/// stored record is the durable handle.
#[derive(Clone, Debug)]
pub struct GenerationQueue {
    tx: mpsc::Sender<Uuid>,
}

impl GenerationQueue {
    pub fn bounded(depth: usize) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Waits for room when the queue is full.
    pub async fn enqueue(&self, id: Uuid) -> Result<(), GenerationError> {
        self.tx
            .send(id)
            .await
            .map_err(|_| GenerationError::QueueClosed)
    }
}

/// A fixed number of tasks draining the queue.
///
/// The orchestrator holds the only [`GenerationQueue`], so the pool runs
/// until [`WorkerPool::shutdown`]; after that every submission fails with
/// `QueueClosed` and is refunded.
pub struct WorkerPool {
    stop: watch::Sender<bool>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        orchestrator: Arc<Orchestrator>,
        receiver: mpsc::Receiver<Uuid>,
        workers: usize,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let (stop, stopped) = watch::channel(false);
        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    orchestrator.clone(),
                    receiver.clone(),
                    stopped.clone(),
                ))
            })
            .collect();
        info!(workers = workers.max(1), "worker pool started");
        Self {
            stop,
            receiver,
            handles,
        }
    }

    /// Close the queue and wait for in-flight generations to finish.
    /// Ids still queued stay `processing` until the next startup
    /// reconciliation.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        {
            let mut receiver = self.receiver.lock().await;
            receiver.close();
            let mut left = 0usize;
            while receiver.try_recv().is_ok() {
                left += 1;
            }
            if left > 0 {
                warn!(count = left, "queued generations left for startup reconciliation");
            }
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        info!("worker pool stopped");
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<Orchestrator>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = stopped.changed() => None,
            id = async { receiver.lock().await.recv().await } => id,
        };
        let Some(id) = next else {
            debug!(worker, "worker exiting");
            break;
        };
        match orchestrator.execute(id).await {
            Ok(status) => debug!(worker, generation_id = %id, %status, "generation settled"),
            Err(e) => error!(worker, generation_id = %id, error = %e, "generation could not be executed"),
        }
    }
}
