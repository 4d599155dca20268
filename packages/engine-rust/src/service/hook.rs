//! Hook capability: middleware wrapped around handler execution.

use async_trait::async_trait;
use conductor_core::{Context, Operation, User, Value};

use crate::error::OperationError;

/// The operation being executed together with its request context.
///
/// Hooks may rewrite or replace the held operation during `pre_execute`.
#[derive(Debug)]
pub struct Request<'a> {
    operation: Operation,
    context: &'a Context,
}

impl<'a> Request<'a> {
    #[must_use]
    pub fn new(operation: Operation, context: &'a Context) -> Self {
        Self { operation, context }
    }

    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn operation_mut(&mut self) -> &mut Operation {
        &mut self.operation
    }

    /// Replaces the held operation, returning the previous one.
    pub fn replace_operation(&mut self, operation: Operation) -> Operation {
        std::mem::replace(&mut self.operation, operation)
    }

    #[must_use]
    pub fn context(&self) -> &'a Context {
        self.context
    }

    #[must_use]
    pub fn user(&self) -> &'a User {
        self.context.user()
    }

    #[must_use]
    pub fn into_operation(self) -> Operation {
        self.operation
    }
}

/// Before/after/failure extension points around execution. All three default
/// to no-ops. Hooks run in registration order.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Runs before handler resolution. May rewrite the operation or reject it.
    async fn pre_execute(&self, _request: &mut Request<'_>) -> Result<(), OperationError> {
        Ok(())
    }

    /// Runs after the handler succeeds; receives the previous hook's output.
    async fn post_execute(
        &self,
        result: Value,
        _request: &Request<'_>,
    ) -> Result<Value, OperationError> {
        Ok(result)
    }

    /// Runs when the hook pipeline or handler failed. May produce a recovered
    /// result; errors raised here are logged and ignored.
    async fn on_failure(
        &self,
        result: Option<Value>,
        _request: &Request<'_>,
        _error: &OperationError,
    ) -> Result<Option<Value>, OperationError> {
        Ok(result)
    }
}
