//! Federation: one logical executor fanning operations out to a dynamic set
//! of sub-executors.
//!
//! - [`access`]: who may see and remove a sub-executor
//! - [`storage`]: the registered sub-executors, grouped by access
//! - [`merge`]: named functions folding sub-executor results together
//! - [`library`]: property presets and the factory building sub-executors
//! - [`handlers`]: `AddExecutor`, `RemoveExecutor`, `GetAllExecutorIds`,
//!   `FederatedOperation`

pub mod access;
pub mod handlers;
pub mod library;
pub mod merge;
pub mod storage;

pub use access::FederatedAccess;
pub use handlers::{
    AddExecutorHandler, FederatedOperationHandler, GetAllExecutorIdsHandler, RemoveExecutorHandler,
};
pub use library::{ExecutorFactory, ExecutorLibrary};
pub use merge::{MergeFunction, MergeRegistry, DEFAULT_MERGE};
pub use storage::FederatedStorage;
