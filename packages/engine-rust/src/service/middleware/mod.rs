//! Tower middleware layers around an [`Executor`](crate::service::Executor).
//!
//! - [`request`]: `ExecuteRequest` and the innermost `ExecutorService`
//! - [`timeout`]: Per-request timeout enforcement
//! - [`admission`]: Per-user in-flight limit
//! - [`metrics`]: Request timing and outcome via `tracing` spans
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod admission;
pub mod metrics;
pub mod pipeline;
pub mod request;
pub mod timeout;

pub use admission::UserAdmissionLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_execution_pipeline;
pub use request::{ExecuteRequest, ExecutorService};
pub use timeout::TimeoutLayer;

/// Boxed future shared by every layer in the stack.
pub type ServiceFuture = std::pin::Pin<
    Box<
        dyn std::future::Future<
                Output = Result<conductor_core::Value, crate::error::OperationError>,
            > + Send,
    >,
>;
