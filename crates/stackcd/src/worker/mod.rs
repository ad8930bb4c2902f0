pub mod job;
pub mod pool;

pub use job::{JobResult, ReconcileJob, Trigger};
pub use pool::{JobHandler, WorkerPool};
