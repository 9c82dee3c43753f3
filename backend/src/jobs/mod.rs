// Background Jobs Service
//
// Scheduled with tokio-cron-scheduler. The orphan reaper fails executions
// whose worker stopped heartbeating, e.g. after a process restart.

pub mod orphan_reaper;
pub mod scheduler;

pub use orphan_reaper::{OrphanReaperJob, ORPHANED_EXECUTION_ERROR};
pub use scheduler::{JobError, JobLog, JobResult, JobScheduler};
