//! The innermost service of the pipeline: hands each request to an executor.

use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use conductor_core::{Context, Operation, Value};
use tower::Service;

use super::ServiceFuture;
use crate::error::OperationError;
use crate::service::executor::Executor;

/// One top-level request travelling through the tower stack.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub operation: Operation,
    pub context: Arc<Context>,
    /// Overrides the pipeline's default timeout for this request.
    pub timeout_ms: Option<u64>,
}

impl ExecuteRequest {
    #[must_use]
    pub fn new(operation: Operation, context: Context) -> Self {
        Self {
            operation,
            context: Arc::new(context),
            timeout_ms: None,
        }
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// `tower::Service` adapter over [`Executor::execute`].
#[derive(Debug, Clone)]
pub struct ExecutorService {
    executor: Executor,
}

impl ExecutorService {
    #[must_use]
    pub fn new(executor: Executor) -> Self {
        Self { executor }
    }
}

impl Service<ExecuteRequest> for ExecutorService {
    type Response = Value;
    type Error = OperationError;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ExecuteRequest) -> Self::Future {
        let executor = self.executor.clone();
        Box::pin(async move {
            let ExecuteRequest {
                operation, context, ..
            } = request;
            executor.execute(operation, &context).await
        })
    }
}
