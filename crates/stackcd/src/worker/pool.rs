use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::worker::job::{JobResult, ReconcileJob};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a job to completion on a worker thread.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &ReconcileJob) -> JobResult;
}

/// Fixed set of threads draining a shared job queue.
pub struct WorkerPool {
    job_sender: Sender<ReconcileJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(handler: Arc<dyn JobHandler>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker count must be greater than 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = bounded::<ReconcileJob>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("stackcd-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_handler))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    /// Queues a job, blocking while the queue is full.
    pub fn submit(&self, job: ReconcileJob) -> Result<(), WorkerError> {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to exit. Call [`WorkerPool::shutdown`] first.
    pub fn wait(&self) {
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<ReconcileJob>,
    shutdown: Arc<AtomicBool>,
    handler: Arc<dyn JobHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                debug!(
                    "Worker {} processing {} job for stack {}",
                    worker_id,
                    job.trigger,
                    job.stack.name()
                );

                let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job)))
                    .unwrap_or_else(|_| {
                        error!(
                            "Worker {} panicked while reconciling stack {}",
                            worker_id,
                            job.stack.name()
                        );
                        JobResult::aborted(&job, "reconciliation panicked")
                    });

                if let Some(done) = &job.done {
                    if done.send(result).is_err() {
                        debug!("Worker {}: nobody is waiting for job {}", worker_id, job.id);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
