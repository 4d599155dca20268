use conductor_core::User;
use dashmap::DashMap;

use super::{JobDetail, JobStatus};

/// Storage for job details. Callers only see their own jobs.
pub trait JobTracker: Send + Sync {
    /// Inserts or replaces a job detail.
    fn put(&self, detail: JobDetail);

    /// Applies a status change to a stored job. Returns false for an unknown
    /// id or a job already in a terminal state.
    fn transition(&self, job_id: &str, status: JobStatus, description: Option<String>) -> bool;

    fn get(&self, job_id: &str, user: &User) -> Option<JobDetail>;

    /// Every job owned by `user`, oldest first.
    fn list_all(&self, user: &User) -> Vec<JobDetail>;
}

/// Process-local tracker.
#[derive(Debug, Default)]
pub struct MemoryJobTracker {
    jobs: DashMap<String, JobDetail>,
}

impl MemoryJobTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobTracker for MemoryJobTracker {
    fn put(&self, detail: JobDetail) {
        self.jobs.insert(detail.job_id.clone(), detail);
    }

    fn transition(&self, job_id: &str, status: JobStatus, description: Option<String>) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(mut entry) if !entry.status.is_terminal() => {
                entry.transition(status, description);
                true
            }
            _ => false,
        }
    }

    fn get(&self, job_id: &str, user: &User) -> Option<JobDetail> {
        self.jobs
            .get(job_id)
            .filter(|entry| entry.user_id == user.user_id)
            .map(|entry| entry.value().clone())
    }

    fn list_all(&self, user: &User) -> Vec<JobDetail> {
        let mut jobs: Vec<JobDetail> = self
            .jobs
            .iter()
            .filter(|entry| entry.user_id == user.user_id)
            .map(|entry| entry.value().clone())
            .collect();
        jobs.sort_by(|a, b| {
            a.started_at_ms
                .cmp(&b.started_at_ms)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }
}
