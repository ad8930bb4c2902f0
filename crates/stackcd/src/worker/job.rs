use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::stack::{ReconcileError, ReconcileOutcome, Stack};

/// What caused a job to be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Scheduled => f.write_str("scheduled"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

/// One reconciliation of one stack.
pub struct ReconcileJob {
    pub id: String,
    pub stack: Arc<Stack>,
    pub trigger: Trigger,
    /// Receives the result once the job has run.
    pub done: Option<Sender<JobResult>>,
}

impl ReconcileJob {
    pub fn new(stack: Arc<Stack>, trigger: Trigger) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stack,
            trigger,
            done: None,
        }
    }

    pub fn with_completion(mut self, done: Sender<JobResult>) -> Self {
        self.done = Some(done);
        self
    }
}

impl fmt::Debug for ReconcileJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileJob")
            .field("id", &self.id)
            .field("stack", &self.stack.name())
            .field("trigger", &self.trigger)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub job_id: String,
    pub stack: String,
    pub success: bool,
    pub revision: Option<String>,
    pub deployed: bool,
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(job: &ReconcileJob, outcome: &ReconcileOutcome) -> Self {
        Self {
            job_id: job.id.clone(),
            stack: job.stack.name().to_string(),
            success: true,
            revision: Some(outcome.revision.clone()),
            deployed: outcome.deployed,
            error: None,
        }
    }

    pub fn failure(job: &ReconcileJob, error: &ReconcileError) -> Self {
        Self {
            job_id: job.id.clone(),
            stack: job.stack.name().to_string(),
            success: false,
            revision: error.revision.clone(),
            deployed: false,
            error: Some(error.to_string()),
        }
    }

    /// The job never produced a result, e.g. the worker panicked.
    pub fn aborted(job: &ReconcileJob, reason: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            stack: job.stack.name().to_string(),
            success: false,
            revision: None,
            deployed: false,
            error: Some(reason.into()),
        }
    }
}
