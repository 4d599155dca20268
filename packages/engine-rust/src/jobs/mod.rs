//! Background jobs: operations run outside the request that submitted them.
//!
//! - [`tracker`]: where job details live
//! - [`service`]: the bounded worker running jobs and repeat schedules
//! - [`handlers`]: `ExecuteJob`, `GetJobDetails`, `GetAllJobDetails`,
//!   `CancelScheduledJob`

pub mod handlers;
pub mod service;
pub mod tracker;

use std::time::{SystemTime, UNIX_EPOCH};

use conductor_core::{Operation, User};
use serde::{Deserialize, Serialize};

pub use handlers::{
    CancelScheduledJobHandler, ExecuteJobHandler, GetAllJobDetailsHandler, GetJobDetailsHandler,
};
pub use service::JobService;
pub use tracker::{JobTracker, MemoryJobTracker};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// A repeating job. It never runs itself; each period spawns a child job.
    ScheduledParent,
    /// Accepted and waiting for a free worker.
    Queued,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

/// Repeat schedule for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repeat {
    #[serde(default)]
    pub initial_delay_ms: u64,
    pub repeat_period_ms: u64,
}

impl Repeat {
    #[must_use]
    pub fn new(initial_delay_ms: u64, repeat_period_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            repeat_period_ms,
        }
    }
}

/// Tracked state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<String>,
    pub user_id: String,
    pub operation: Operation,
    pub status: JobStatus,
    /// Failure message, if the job failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl JobDetail {
    #[must_use]
    pub fn new(job_id: impl Into<String>, user: &User, operation: Operation, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            parent_job_id: None,
            user_id: user.user_id.clone(),
            operation,
            status,
            description: None,
            repeat: None,
            started_at_ms: now_ms(),
            finished_at_ms: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent_job_id: impl Into<String>) -> Self {
        self.parent_job_id = Some(parent_job_id.into());
        self
    }

    #[must_use]
    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    /// Moves the job to `status`. Entering `Running` restamps the start time;
    /// terminal states stamp the finish time.
    pub fn transition(&mut self, status: JobStatus, description: Option<String>) {
        self.status = status;
        if description.is_some() {
            self.description = description;
        }
        if status == JobStatus::Running {
            self.started_at_ms = now_ms();
        }
        if status.is_terminal() {
            self.finished_at_ms = Some(now_ms());
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
