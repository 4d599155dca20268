//! Job operations.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{Context, FieldDeclaration, Operation, Value, ValueType};

use super::service::JobService;
use super::Repeat;
use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;
use crate::service::handlers::payload;

const JOB_ID_ARG: &str = "jobId";

fn job_id(operation: &Operation) -> &str {
    operation.arg_str(JOB_ID_ARG).unwrap_or_default()
}

/// `ExecuteJob`: runs the wrapped operation in the background on the current
/// executor and returns the new job's detail.
#[derive(Debug, Clone)]
pub struct ExecuteJobHandler {
    jobs: Arc<JobService>,
}

impl ExecuteJobHandler {
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl OperationHandler for ExecuteJobHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let job = payload(operation)
            .ok_or_else(|| OperationError::validation("ExecuteJob needs an operation to run"))?;
        let repeat = operation
            .arg("repeat")
            .map(Value::deserialize_into::<Repeat>)
            .transpose()?;
        let detail = self.jobs.submit(executor, job, context.user(), repeat).await?;
        Ok(Value::from_serialize(&detail)?)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().optional("repeat", ValueType::Map)
    }
}

#[derive(Debug, Clone)]
pub struct GetJobDetailsHandler {
    jobs: Arc<JobService>,
}

impl GetJobDetailsHandler {
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl OperationHandler for GetJobDetailsHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        // Inside a job, no jobId means the job itself.
        let id = match operation.arg_str(JOB_ID_ARG) {
            Some(id) => id,
            None => context
                .job_id()
                .ok_or_else(|| OperationError::validation("GetJobDetails needs a jobId"))?,
        };
        let detail = self
            .jobs
            .tracker()
            .get(id, context.user())
            .ok_or_else(|| OperationError::NotFound(format!("job {id}")))?;
        Ok(Value::from_serialize(&detail)?)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().optional(JOB_ID_ARG, ValueType::String)
    }
}

#[derive(Debug, Clone)]
pub struct GetAllJobDetailsHandler {
    jobs: Arc<JobService>,
}

impl GetAllJobDetailsHandler {
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl OperationHandler for GetAllJobDetailsHandler {
    async fn handle(
        &self,
        _operation: &Operation,
        context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let details = self.jobs.tracker().list_all(context.user());
        Ok(Value::from_serialize(&details)?)
    }
}

#[derive(Debug, Clone)]
pub struct CancelScheduledJobHandler {
    jobs: Arc<JobService>,
}

impl CancelScheduledJobHandler {
    #[must_use]
    pub fn new(jobs: Arc<JobService>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl OperationHandler for CancelScheduledJobHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let detail = self.jobs.cancel(job_id(operation), context.user())?;
        Ok(Value::from_serialize(&detail)?)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().required(JOB_ID_ARG, ValueType::String)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use conductor_core::{op_types, User};

    use super::*;
    use crate::error::Status;
    use crate::jobs::{JobDetail, JobStatus, MemoryJobTracker};
    use crate::service::config::Config;
    use crate::service::handlers::register_builtins;

    fn job_executor() -> Executor {
        let jobs = Arc::new(JobService::start(Arc::new(MemoryJobTracker::new()), 2));
        let config = register_builtins(Config::builder())
            .handler(op_types::EXECUTE_JOB, ExecuteJobHandler::new(Arc::clone(&jobs)))
            .handler(op_types::GET_JOB_DETAILS, GetJobDetailsHandler::new(Arc::clone(&jobs)))
            .handler(op_types::GET_ALL_JOB_DETAILS, GetAllJobDetailsHandler::new(Arc::clone(&jobs)))
            .handler(op_types::CANCEL_SCHEDULED_JOB, CancelScheduledJobHandler::new(jobs))
            .build()
            .unwrap();
        Executor::new("jobs", config)
    }

    fn detail(value: Value) -> JobDetail {
        value.deserialize_into().unwrap()
    }

    #[tokio::test]
    async fn execute_job_then_poll_details() {
        let executor = job_executor();
        let alice = Context::new(User::new("alice"));
        let submit = Operation::composite(
            op_types::EXECUTE_JOB,
            vec![Operation::new(op_types::COUNT).with_input(Value::Int(9))],
        );
        let submitted = detail(executor.execute(submit, &alice).await.unwrap());
        assert_eq!(submitted.status, JobStatus::Queued);

        let get = Operation::new(op_types::GET_JOB_DETAILS).with_arg(JOB_ID_ARG, submitted.job_id.as_str());
        let mut status = submitted.status;
        for _ in 0..300 {
            status = detail(executor.execute(get.clone(), &alice).await.unwrap()).status;
            if status == JobStatus::Finished {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Finished);

        let err = executor
            .execute(get, &Context::new(User::new("bob")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::NotFound);

        let all = executor
            .execute(Operation::new(op_types::GET_ALL_JOB_DETAILS), &alice)
            .await
            .unwrap();
        assert_eq!(all.as_array().map(<[Value]>::len), Some(1));
    }

    #[tokio::test]
    async fn scheduled_job_can_be_cancelled_through_an_operation() {
        let executor = job_executor();
        let alice = Context::new(User::new("alice"));
        let mut repeat = BTreeMap::new();
        repeat.insert("initialDelayMs".to_string(), Value::Int(1_000));
        repeat.insert("repeatPeriodMs".to_string(), Value::Int(1_000));
        let submit = Operation::composite(op_types::EXECUTE_JOB, vec![Operation::new(op_types::COUNT)])
            .with_arg("repeat", repeat);

        let parent = detail(executor.execute(submit, &alice).await.unwrap());
        assert_eq!(parent.status, JobStatus::ScheduledParent);
        assert_eq!(parent.repeat.map(|r| r.repeat_period_ms), Some(1_000));

        let cancel = Operation::new(op_types::CANCEL_SCHEDULED_JOB).with_arg(JOB_ID_ARG, parent.job_id.as_str());
        let cancelled = detail(executor.execute(cancel, &alice).await.unwrap());
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn job_payload_receives_the_carrier_input() {
        let executor = job_executor();
        let alice = Context::new(User::new("alice"));
        let items = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let submit = Operation::composite(
            op_types::EXECUTE_JOB,
            vec![Operation::new(op_types::COUNT).accepting_input()],
        )
        .with_input(items.clone());

        let submitted = detail(executor.execute(submit, &alice).await.unwrap());
        assert!(submitted.operation.is_type(op_types::COUNT));
        assert_eq!(submitted.operation.input(), Some(&items));
    }

    #[tokio::test]
    async fn execute_job_without_payload_is_rejected() {
        let executor = job_executor();
        let err = executor
            .execute(Operation::new(op_types::EXECUTE_JOB), &Context::new(User::new("alice")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
    }
}
