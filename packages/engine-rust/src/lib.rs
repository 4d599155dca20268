//! Conductor engine: executor with a two-tier hook pipeline, named
//! operations, authorisation and chain scoring hooks, federation and
//! background jobs.

pub mod engine;
pub mod error;
pub mod federation;
pub mod hooks;
pub mod jobs;
pub mod named;
pub mod service;

pub use engine::{standard_executor, Engine, ROOT_EXECUTOR_ID};
pub use error::{ErrorReport, OperationError, Status};
pub use service::{
    config, executor, handler, handlers, hook, middleware, properties, Config, ConfigBuilder,
    Executor, Hook, OperationHandler, Properties, Request, ServiceConfig,
};
