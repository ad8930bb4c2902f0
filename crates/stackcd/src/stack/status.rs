use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use super::reconciler::{ReconcileError, ReconcileOutcome};

/// Latest reconciliation result of a stack, as served to status clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    /// Empty when the last attempt succeeded.
    pub error: String,
    pub revision: String,
    pub repo_url: String,
    pub templated: bool,
}

/// In-memory status of every configured stack.
#[derive(Debug, Default)]
pub struct StatusBoard {
    statuses: RwLock<BTreeMap<String, StackStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stack with an empty status.
    pub fn register(&self, stack: &str, repo_url: &str) {
        self.write().insert(
            stack.to_string(),
            StackStatus {
                repo_url: repo_url.to_string(),
                ..StackStatus::default()
            },
        );
    }

    pub fn get(&self, stack: &str) -> Option<StackStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stack)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, StackStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_success(&self, stack: &str, outcome: &ReconcileOutcome) {
        let mut statuses = self.write();
        let status = statuses.entry(stack.to_string()).or_default();
        status.error.clear();
        status.revision = outcome.revision.clone();
        status.templated = outcome.templated;
    }

    /// Stores the error. The revision only moves if the failure happened
    /// after the pull.
    pub fn record_failure(&self, stack: &str, error: &ReconcileError) {
        let mut statuses = self.write();
        let status = statuses.entry(stack.to_string()).or_default();
        status.error = error.to_string();
        if let Some(revision) = &error.revision {
            status.revision = revision.clone();
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StackStatus>> {
        self.statuses.write().unwrap_or_else(PoisonError::into_inner)
    }
}
