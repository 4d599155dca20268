//! Named operations: stored, parameterized operation chains invoked by name.
//!
//! - [`detail`]: the stored definition, parameter checks and substitution
//! - [`cache`]: access-controlled in-memory store
//! - [`handlers`]: `AddNamedOperation`, `GetAllNamedOperations`, `DeleteNamedOperation`
//! - [`score`]: scores `NamedOperation` references for the chain limiter
//!
//! Expansion of references inside requests is done by
//! [`NamedOperationResolver`](crate::hooks::NamedOperationResolver).

pub mod cache;
pub mod detail;
pub mod handlers;
pub mod score;

pub use cache::NamedOperationCache;
pub use detail::{NamedOperationDetail, ParameterDetail};
pub use handlers::{AddNamedOperationHandler, DeleteNamedOperationHandler, GetAllNamedOperationsHandler};
pub use score::NamedOperationScoreResolver;

/// Argument of a `NamedOperation` reference naming the stored operation.
pub const OPERATION_NAME_ARG: &str = "operationName";
/// Argument of a `NamedOperation` reference carrying parameter values.
pub const PARAMETERS_ARG: &str = "parameters";
