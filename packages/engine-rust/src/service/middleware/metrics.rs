//! Outcome logging for top-level execute requests.
//!
//! Every request gets an `execute` span naming the executor, the user, the
//! job it runs under and the operation it carries. Completion is logged with
//! its duration; a failure is logged as the `ErrorReport` a caller would see.

use std::task::{Context, Poll};
use std::time::Instant;

use conductor_core::{op_types, Operation, Value};
use tower::{Layer, Service};
use tracing::{info, info_span, warn, Instrument};

use super::request::ExecuteRequest;
use super::ServiceFuture;
use crate::error::{ErrorReport, OperationError};

/// Short description of a request's operation: its type, or the types of a
/// chain's children in order.
#[must_use]
pub fn summarize(operation: &Operation) -> String {
    if !operation.is_type(op_types::OPERATION_CHAIN) {
        return operation.op_type().to_string();
    }
    let steps: Vec<&str> = operation.children().iter().map(Operation::op_type).collect();
    format!("{}[{}]", operation.op_type(), steps.join(" > "))
}

#[derive(Debug, Clone)]
pub struct MetricsLayer {
    executor_id: String,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(executor_id: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
        }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            executor_id: self.executor_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
    executor_id: String,
}

impl<S> Service<ExecuteRequest> for MetricsService<S>
where
    S: Service<ExecuteRequest, Response = Value, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = Value;
    type Error = OperationError;
    type Future = ServiceFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: ExecuteRequest) -> Self::Future {
        let span = info_span!(
            "execute",
            executor = %self.executor_id,
            user = %request.context.user_id(),
            job = request.context.job_id().unwrap_or("-"),
            operation = %summarize(&request.operation),
        );
        let response = self.inner.call(request);
        Box::pin(
            async move {
                let start = Instant::now();
                let result = response.await;
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                match &result {
                    Ok(_) => info!(duration_ms, "execute complete"),
                    Err(err) => {
                        let report = ErrorReport::new(err, false);
                        warn!(
                            duration_ms,
                            status = report.status.as_str(),
                            message = %report.message,
                            "execute failed"
                        );
                    }
                }
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use conductor_core::{Context as RequestContext, User};
    use tower::ServiceExt;

    use super::*;
    use crate::error::Status;

    /// Echoes the operation type, or fails for `Fail`.
    #[derive(Clone)]
    struct Echo;

    impl Service<ExecuteRequest> for Echo {
        type Response = Value;
        type Error = OperationError;
        type Future = ServiceFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: ExecuteRequest) -> Self::Future {
            let op_type = request.operation.op_type().to_string();
            Box::pin(async move {
                if op_type == "Fail" {
                    Err(OperationError::Overloaded)
                } else {
                    Ok(Value::String(op_type))
                }
            })
        }
    }

    fn request(operation: Operation) -> ExecuteRequest {
        ExecuteRequest::new(
            operation,
            RequestContext::new(User::new("u")).with_job_id("job-1"),
        )
    }

    #[test]
    fn chains_are_summarized_by_their_steps() {
        assert_eq!(summarize(&Operation::new(op_types::COUNT)), "Count");
        let chain = Operation::chain(vec![
            Operation::new(op_types::LIMIT),
            Operation::new(op_types::COUNT),
        ]);
        assert_eq!(summarize(&chain), "OperationChain[Limit > Count]");
    }

    #[tokio::test]
    async fn responses_and_errors_pass_through_unchanged() {
        let svc = MetricsLayer::new("root").layer(Echo);
        let value = svc
            .clone()
            .oneshot(request(Operation::new("GetAll")))
            .await
            .unwrap();
        assert_eq!(value, Value::from("GetAll"));

        let err = svc.oneshot(request(Operation::new("Fail"))).await.unwrap_err();
        assert_eq!(err.status(), Status::Unavailable);
    }
}
