//! Timeout middleware for execute requests.
//!
//! A request's own `timeout_ms` wins over the layer default; with neither,
//! the request runs unbounded. Expiry drops the in-flight execution.

use std::task::{Context, Poll};
use std::time::Duration;

use conductor_core::Value;
use tower::{Layer, Service};

use super::request::ExecuteRequest;
use super::ServiceFuture;
use crate::error::OperationError;

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TimeoutLayer {
    default_timeout_ms: Option<u64>,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(default_timeout_ms: Option<u64>) -> Self {
        Self { default_timeout_ms }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            default_timeout_ms: self.default_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    default_timeout_ms: Option<u64>,
}

impl<S> Service<ExecuteRequest> for TimeoutService<S>
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
        let timeout_ms = request.timeout_ms.or(self.default_timeout_ms);
        let fut = self.inner.call(request);
        Box::pin(async move {
            let Some(timeout_ms) = timeout_ms else {
                return fut.await;
            };
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(OperationError::Timeout { timeout_ms }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
