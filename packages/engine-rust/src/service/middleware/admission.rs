//! Per-user admission control for top-level execute requests.
//!
//! Each user may hold a bounded number of requests in flight against one
//! executor. A request over the user's budget is refused up front with
//! `OperationError::Overloaded`, which reports as `UNAVAILABLE`. Other users
//! are unaffected.

use std::sync::Arc;
use std::task::{Context, Poll};

use conductor_core::Value;
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use super::request::ExecuteRequest;
use super::ServiceFuture;
use crate::error::OperationError;

/// In-flight budgets keyed by user id, shared by every clone of the layer.
#[derive(Debug)]
struct Budgets {
    executor_id: String,
    per_user: usize,
    users: DashMap<String, Arc<Semaphore>>,
}

impl Budgets {
    fn admit(&self, user_id: &str) -> Option<OwnedSemaphorePermit> {
        let budget = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_user)))
            .clone();
        budget.try_acquire_owned().ok()
    }
}

#[derive(Debug, Clone)]
pub struct UserAdmissionLayer {
    budgets: Arc<Budgets>,
}

impl UserAdmissionLayer {
    /// `per_user` of zero is raised to one so every user can run something.
    #[must_use]
    pub fn new(executor_id: impl Into<String>, per_user: u32) -> Self {
        Self {
            budgets: Arc::new(Budgets {
                executor_id: executor_id.into(),
                per_user: per_user.max(1) as usize,
                users: DashMap::new(),
            }),
        }
    }
}

impl<S> Layer<S> for UserAdmissionLayer {
    type Service = UserAdmission<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAdmission {
            inner,
            budgets: Arc::clone(&self.budgets),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserAdmission<S> {
    inner: S,
    budgets: Arc<Budgets>,
}

impl<S> Service<ExecuteRequest> for UserAdmission<S>
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
        let user_id = request.context.user_id();
        let Some(permit) = self.budgets.admit(user_id) else {
            warn!(
                executor = %self.budgets.executor_id,
                user = %user_id,
                limit = self.budgets.per_user,
                operation = %request.operation.op_type(),
                "request refused: user is at the in-flight limit"
            );
            return Box::pin(async { Err(OperationError::Overloaded) });
        };
        let response = self.inner.call(request);
        Box::pin(async move {
            let _permit = permit;
            response.await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conductor_core::{Context as RequestContext, Operation, User};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use super::*;
    use crate::error::{ErrorReport, Status};

    /// Holds every request until released.
    #[derive(Clone)]
    struct Gate(Arc<Notify>);

    impl Service<ExecuteRequest> for Gate {
        type Response = Value;
        type Error = OperationError;
        type Future = ServiceFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, request: ExecuteRequest) -> Self::Future {
            let gate = Arc::clone(&self.0);
            Box::pin(async move {
                gate.notified().await;
                Ok(Value::from(request.context.user_id()))
            })
        }
    }

    fn request(user: &str) -> ExecuteRequest {
        ExecuteRequest::new(Operation::new("GetAll"), RequestContext::new(User::new(user)))
    }

    #[tokio::test]
    async fn busy_user_is_refused_while_others_are_admitted() {
        let gate = Arc::new(Notify::new());
        let svc = UserAdmissionLayer::new("root", 1).layer(Gate(Arc::clone(&gate)));

        let held = tokio::spawn(svc.clone().oneshot(request("alice")));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = svc.clone().oneshot(request("alice")).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));
        assert_eq!(ErrorReport::new(&err, false).status, Status::Unavailable);

        let bob = tokio::spawn(svc.clone().oneshot(request("bob")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_waiters();
        assert_eq!(bob.await.unwrap().unwrap(), Value::from("bob"));
        assert_eq!(held.await.unwrap().unwrap(), Value::from("alice"));
    }

    #[tokio::test]
    async fn budget_is_returned_when_a_request_completes() {
        let gate = Arc::new(Notify::new());
        let svc = UserAdmissionLayer::new("root", 1).layer(Gate(Arc::clone(&gate)));

        gate.notify_one();
        assert!(svc.clone().oneshot(request("alice")).await.is_ok());
        gate.notify_one();
        assert!(svc.oneshot(request("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn zero_budget_still_admits_one() {
        let gate = Arc::new(Notify::new());
        gate.notify_one();
        let svc = UserAdmissionLayer::new("root", 0).layer(Gate(gate));
        assert!(svc.oneshot(request("alice")).await.is_ok());
    }
}
