//! Bounded background worker for jobs.
//!
//! Submitted jobs go through an mpsc channel to a dispatcher task, which
//! spawns each one once a permit from the worker semaphore is free. Repeating
//! jobs get their own schedule task that feeds a child job into the same
//! channel every period until the parent is cancelled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conductor_core::{Context, Operation, User};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::tracker::JobTracker;
use super::{JobDetail, JobStatus, Repeat};
use crate::error::OperationError;
use crate::service::executor::Executor;

const CHANNEL_CAPACITY: usize = 256;

struct JobTask {
    job_id: String,
    executor: Executor,
    operation: Operation,
    user: User,
}

/// Runs jobs in the background on at most `threads` concurrent tasks.
///
/// Must be started inside a tokio runtime.
pub struct JobService {
    tracker: Arc<dyn JobTracker>,
    tx: mpsc::Sender<JobTask>,
    schedules: DashMap<String, AbortHandle>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobService {
    #[must_use]
    pub fn start(tracker: Arc<dyn JobTracker>, threads: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<JobTask>(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let permits = Arc::new(Semaphore::new(threads.max(1)));
        let runner_tracker = Arc::clone(&tracker);

        let dispatcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    task = rx.recv() => {
                        let Some(task) = task else { break };
                        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                            break;
                        };
                        let tracker = Arc::clone(&runner_tracker);
                        tokio::spawn(async move {
                            run_job(task, tracker.as_ref()).await;
                            drop(permit);
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("job dispatcher stopped");
        });

        Self {
            tracker,
            tx,
            schedules: DashMap::new(),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<dyn JobTracker> {
        &self.tracker
    }

    /// Submits `operation` to run on `executor` as `user`.
    ///
    /// Without `repeat` the job is queued at once and reported as `QUEUED`
    /// until a worker picks it up.
    /// With `repeat` a `SCHEDULED_PARENT` is recorded and a child job is
    /// queued after the initial delay and then once per period.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for a zero repeat period and `Internal` if the
    /// service has been shut down.
    pub async fn submit(
        &self,
        executor: &Executor,
        operation: Operation,
        user: &User,
        repeat: Option<Repeat>,
    ) -> Result<JobDetail, OperationError> {
        let job_id = Uuid::new_v4().to_string();

        let Some(repeat) = repeat else {
            let detail = JobDetail::new(&job_id, user, operation.clone(), JobStatus::Queued);
            self.tracker.put(detail.clone());
            let task = JobTask {
                job_id: job_id.clone(),
                executor: executor.clone(),
                operation,
                user: user.clone(),
            };
            if self.tx.send(task).await.is_err() {
                self.tracker
                    .transition(&job_id, JobStatus::Failed, Some("job service stopped".to_string()));
                return Err(OperationError::Internal(anyhow::anyhow!("job service is not running")));
            }
            info!(%job_id, user = %user.user_id, "job submitted");
            return Ok(detail);
        };

        if repeat.repeat_period_ms == 0 {
            return Err(OperationError::validation("repeatPeriodMs must be greater than zero"));
        }
        if self.tx.is_closed() {
            return Err(OperationError::Internal(anyhow::anyhow!("job service is not running")));
        }
        let detail = JobDetail::new(&job_id, user, operation.clone(), JobStatus::ScheduledParent)
            .with_repeat(repeat);
        self.tracker.put(detail.clone());

        let schedule = Schedule {
            parent_id: job_id.clone(),
            repeat,
            executor: executor.clone(),
            operation,
            user: user.clone(),
            tracker: Arc::clone(&self.tracker),
            tx: self.tx.clone(),
        };
        let handle = tokio::spawn(schedule.run());
        self.schedules.insert(job_id.clone(), handle.abort_handle());
        info!(%job_id, period_ms = repeat.repeat_period_ms, "repeating job scheduled");
        Ok(detail)
    }

    /// Stops a repeating job. Children already queued still run.
    ///
    /// # Errors
    ///
    /// `NotFound` if `user` has no such job; `Validation` if the job is not a
    /// scheduled parent still running its schedule.
    pub fn cancel(&self, job_id: &str, user: &User) -> Result<JobDetail, OperationError> {
        let detail = self
            .tracker
            .get(job_id, user)
            .ok_or_else(|| OperationError::NotFound(format!("job {job_id}")))?;
        if detail.status != JobStatus::ScheduledParent {
            return Err(OperationError::validation(format!(
                "job {job_id} is not a scheduled parent and cannot be cancelled"
            )));
        }
        if let Some((_, handle)) = self.schedules.remove(job_id) {
            handle.abort();
        }
        self.tracker.transition(job_id, JobStatus::Cancelled, None);
        info!(%job_id, "scheduled job cancelled");
        Ok(self.tracker.get(job_id, user).unwrap_or(detail))
    }

    /// Stops every schedule and the dispatcher, waiting for the dispatcher to
    /// exit. Jobs already running finish on their own.
    pub async fn shutdown(&self) {
        self.abort_schedules();
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn abort_schedules(&self) {
        self.schedules.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}

impl Drop for JobService {
    fn drop(&mut self) {
        self.abort_schedules();
    }
}

impl fmt::Debug for JobService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobService")
            .field("schedules", &self.schedules.len())
            .field("running", &!self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

async fn run_job(task: JobTask, tracker: &dyn JobTracker) {
    let JobTask {
        job_id,
        executor,
        operation,
        user,
    } = task;
    tracker.transition(&job_id, JobStatus::Running, None);
    let context = Context::new(user).with_job_id(job_id.as_str());
    let span = info_span!("job", %job_id, executor = %executor.id());
    match executor.execute(operation, &context).instrument(span).await {
        Ok(_) => {
            tracker.transition(&job_id, JobStatus::Finished, None);
            debug!(%job_id, "job finished");
        }
        Err(err) => {
            warn!(%job_id, error = %err, "job failed");
            tracker.transition(&job_id, JobStatus::Failed, Some(err.to_string()));
        }
    }
}

struct Schedule {
    parent_id: String,
    repeat: Repeat,
    executor: Executor,
    operation: Operation,
    user: User,
    tracker: Arc<dyn JobTracker>,
    tx: mpsc::Sender<JobTask>,
}

impl Schedule {
    async fn run(self) {
        tokio::time::sleep(Duration::from_millis(self.repeat.initial_delay_ms)).await;
        let mut ticker = tokio::time::interval(Duration::from_millis(self.repeat.repeat_period_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let job_id = Uuid::new_v4().to_string();
            self.tracker.put(
                JobDetail::new(&job_id, &self.user, self.operation.clone(), JobStatus::Queued)
                    .with_parent(self.parent_id.as_str()),
            );
            let task = JobTask {
                job_id: job_id.clone(),
                executor: self.executor.clone(),
                operation: self.operation.clone(),
                user: self.user.clone(),
            };
            if self.tx.send(task).await.is_err() {
                self.tracker
                    .transition(&job_id, JobStatus::Failed, Some("job service stopped".to_string()));
                break;
            }
            debug!(parent_id = %self.parent_id, %job_id, "repeat child queued");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use conductor_core::{op_types, Value};
    use tokio::sync::Notify;

    use super::*;
    use crate::error::Status;
    use crate::jobs::MemoryJobTracker;
    use crate::service::config::Config;
    use crate::service::handler::OperationHandler;
    use crate::service::handlers::register_builtins;

    /// Sleeps briefly while tracking how many instances run at once.
    #[derive(Default)]
    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl OperationHandler for Arc<Slow> {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    fn executor(slow: &Arc<Slow>) -> Executor {
        let config = register_builtins(Config::builder())
            .handler("Slow", Arc::clone(slow))
            .build()
            .unwrap();
        Executor::new("jobs", config)
    }

    async fn wait_for(tracker: &dyn JobTracker, job_id: &str, user: &User, status: JobStatus) -> JobDetail {
        for _ in 0..300 {
            if let Some(detail) = tracker.get(job_id, user) {
                if detail.status == status {
                    return detail;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached {status:?}");
    }

    fn children(tracker: &dyn JobTracker, user: &User, parent: &str) -> usize {
        tracker
            .list_all(user)
            .iter()
            .filter(|j| j.parent_job_id.as_deref() == Some(parent))
            .count()
    }

    #[tokio::test]
    async fn one_shot_job_finishes() {
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 2);
        let alice = User::new("alice");
        let op = Operation::new(op_types::COUNT).with_input(Value::Array(vec![Value::Int(1)]));

        let detail = service
            .submit(&executor(&Arc::default()), op, &alice, None)
            .await
            .unwrap();
        assert_eq!(detail.status, JobStatus::Queued);

        let done = wait_for(service.tracker().as_ref(), &detail.job_id, &alice, JobStatus::Finished).await;
        assert!(done.finished_at_ms.is_some());
        assert!(service.tracker().get(&detail.job_id, &User::new("bob")).is_none());
    }

    #[tokio::test]
    async fn failing_job_records_the_error() {
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 2);
        let alice = User::new("alice");
        let detail = service
            .submit(&executor(&Arc::default()), Operation::new(op_types::LIMIT), &alice, None)
            .await
            .unwrap();
        let failed = wait_for(service.tracker().as_ref(), &detail.job_id, &alice, JobStatus::Failed).await;
        assert!(failed.description.unwrap().contains("resultLimit"));
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrency() {
        let slow = Arc::new(Slow::default());
        let executor = executor(&slow);
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 1);
        let alice = User::new("alice");

        let mut ids = Vec::new();
        for _ in 0..3 {
            let detail = service
                .submit(&executor, Operation::new("Slow"), &alice, None)
                .await
                .unwrap();
            ids.push(detail.job_id);
        }
        for id in &ids {
            wait_for(service.tracker().as_ref(), id, &alice, JobStatus::Finished).await;
        }
        assert_eq!(slow.peak.load(Ordering::SeqCst), 1);
    }

    /// Blocks until notified.
    struct Held(Arc<Notify>);

    #[async_trait]
    impl OperationHandler for Held {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            self.0.notified().await;
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn job_waiting_for_a_worker_is_queued() {
        let release = Arc::new(Notify::new());
        let config = register_builtins(Config::builder())
            .handler("Held", Held(Arc::clone(&release)))
            .build()
            .unwrap();
        let executor = Executor::new("jobs", config);
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 1);
        let tracker = service.tracker().as_ref();
        let alice = User::new("alice");

        let first = service
            .submit(&executor, Operation::new("Held"), &alice, None)
            .await
            .unwrap();
        let second = service
            .submit(&executor, Operation::new("Held"), &alice, None)
            .await
            .unwrap();
        assert_eq!(second.status, JobStatus::Queued);

        wait_for(tracker, &first.job_id, &alice, JobStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            tracker.get(&second.job_id, &alice).unwrap().status,
            JobStatus::Queued
        );

        release.notify_one();
        wait_for(tracker, &first.job_id, &alice, JobStatus::Finished).await;
        wait_for(tracker, &second.job_id, &alice, JobStatus::Running).await;
        release.notify_one();
        wait_for(tracker, &second.job_id, &alice, JobStatus::Finished).await;
    }

    #[tokio::test]
    async fn repeating_job_spawns_children_until_cancelled() {
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 2);
        let alice = User::new("alice");
        let parent = service
            .submit(
                &executor(&Arc::default()),
                Operation::new(op_types::COUNT),
                &alice,
                Some(Repeat::new(0, 20)),
            )
            .await
            .unwrap();
        assert_eq!(parent.status, JobStatus::ScheduledParent);

        let tracker = service.tracker().as_ref();
        for _ in 0..300 {
            if children(tracker, &alice, &parent.job_id) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(children(tracker, &alice, &parent.job_id) >= 2);

        let cancelled = service.cancel(&parent.job_id, &alice).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = children(tracker, &alice, &parent.job_id);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(children(tracker, &alice, &parent.job_id), settled);

        let err = service.cancel(&parent.job_id, &alice).unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
    }

    #[tokio::test]
    async fn cancel_rules() {
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 2);
        let alice = User::new("alice");
        let one_shot = service
            .submit(&executor(&Arc::default()), Operation::new(op_types::COUNT), &alice, None)
            .await
            .unwrap();

        let err = service.cancel(&one_shot.job_id, &alice).unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
        let err = service.cancel(&one_shot.job_id, &User::new("bob")).unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
        let err = service.cancel("missing", &alice).unwrap_err();
        assert_eq!(err.status(), Status::NotFound);

        let err = service
            .submit(
                &executor(&Arc::default()),
                Operation::new(op_types::COUNT),
                &alice,
                Some(Repeat::new(0, 0)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let service = JobService::start(Arc::new(MemoryJobTracker::new()), 1);
        service.shutdown().await;
        let err = service
            .submit(&executor(&Arc::default()), Operation::new(op_types::COUNT), &User::new("alice"), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::Internal);
    }
}
