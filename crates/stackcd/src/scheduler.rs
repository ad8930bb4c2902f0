//! Periodic reconciliation.
//!
//! Every tick queues each stack on the worker pool and waits for the whole
//! batch before sleeping for the update interval. Manual triggers go straight
//! into the same pool and leave the timer alone.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

use crate::controller::Controller;
use crate::error::{Result, StackCdError, WorkerError};
use crate::worker::{JobHandler, JobResult, ReconcileJob, Trigger, WorkerPool};

struct Inner {
    controller: Arc<Controller>,
    pool: WorkerPool,
}

impl Inner {
    fn run_cycle(&self) -> Vec<JobResult> {
        let (done_tx, done_rx) = unbounded();
        let mut queued = 0;

        for stack in self.controller.stacks() {
            let job = ReconcileJob::new(Arc::clone(stack), Trigger::Scheduled)
                .with_completion(done_tx.clone());
            match self.pool.submit(job) {
                Ok(()) => queued += 1,
                Err(e) => log::warn!("Could not queue stack {}: {}", stack.name(), e),
            }
        }
        drop(done_tx);

        let results: Vec<JobResult> = done_rx.iter().take(queued).collect();
        let failed = results.iter().filter(|r| !r.success).count();
        log::info!(
            "Reconciliation cycle finished: {} stacks, {} failed",
            results.len(),
            failed
        );
        results
    }
}

pub struct Scheduler {
    inner: Arc<Inner>,
    interval: Duration,
    stop: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(controller: Arc<Controller>, concurrency: usize, interval: Duration) -> Result<Self> {
        let pool = WorkerPool::new(Arc::clone(&controller) as Arc<dyn JobHandler>, concurrency)?;
        Ok(Self {
            inner: Arc::new(Inner { controller, pool }),
            interval,
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    /// Starts the timer thread. The first cycle runs immediately.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("stackcd-scheduler".to_string())
            .spawn(move || loop {
                inner.run_cycle();
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!("Scheduler stopped");
                        break;
                    }
                }
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        *handle = Some(spawned);
        *self.stop.lock().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);
        log::info!(
            "Scheduler started, reconciling every {}s",
            self.interval.as_secs()
        );
        Ok(())
    }

    /// Runs one cycle on the calling thread and returns every job result.
    pub fn run_cycle(&self) -> Vec<JobResult> {
        self.inner.run_cycle()
    }

    /// Queues one stack immediately.
    pub fn trigger_stack(&self, name: &str) -> Result<()> {
        let stack = self
            .inner
            .controller
            .stack(name)
            .ok_or_else(|| StackCdError::UnknownStack(name.to_string()))?;
        log::info!("Manual reconciliation of stack {} requested", name);
        self.inner
            .pool
            .submit(ReconcileJob::new(stack, Trigger::Manual))?;
        Ok(())
    }

    /// Queues every stack immediately. Returns how many were queued.
    pub fn trigger_all(&self) -> Result<usize> {
        let mut queued = 0;
        for stack in self.inner.controller.stacks() {
            self.inner
                .pool
                .submit(ReconcileJob::new(Arc::clone(stack), Trigger::Manual))?;
            queued += 1;
        }
        log::info!("Manual reconciliation of {} stacks requested", queued);
        Ok(queued)
    }

    /// Stops the timer, drains the workers and stops credential renewal.
    pub fn stop(&self) {
        if let Some(stop) = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take() {
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }

        self.inner.pool.shutdown();
        self.inner.pool.wait();
        self.inner.controller.shutdown();
    }
}
