//! Pipeline composition: combines all middleware layers into a single service stack.

use conductor_core::Value;
use tower::ServiceBuilder;

use super::admission::UserAdmissionLayer;
use super::metrics::MetricsLayer;
use super::request::{ExecuteRequest, ExecutorService};
use super::timeout::TimeoutLayer;
use crate::error::OperationError;
use crate::service::config::ServiceConfig;
use crate::service::executor::Executor;

/// Wraps an executor with the middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `UserAdmissionLayer`: refuse a user already at the in-flight limit
/// 2. `TimeoutLayer`: enforce per-request timeouts
/// 3. `MetricsLayer`: record timing and outcome
#[must_use]
pub fn build_execution_pipeline(
    executor: Executor,
    config: &ServiceConfig,
) -> impl tower::Service<ExecuteRequest, Response = Value, Error = OperationError> + Clone {
    ServiceBuilder::new()
        .layer(UserAdmissionLayer::new(
            executor.id(),
            config.max_requests_per_user,
        ))
        .layer(TimeoutLayer::new(config.default_timeout_ms))
        .layer(MetricsLayer::new(executor.id()))
        .service(ExecutorService::new(executor))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
