use async_trait::async_trait;
use conductor_core::{Context, FieldDeclaration, Operation, Value};

use super::executor::Executor;
use crate::error::OperationError;

/// Executes one operation type.
///
/// Handlers are shared across concurrent requests, so they are either
/// stateless or synchronize internally. A handler that runs child operations
/// must do so through `executor.execute` so the hook pipeline applies at
/// every nesting level.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Runs the operation. Field validation has already passed.
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError>;

    /// Fields this handler reads, checked before `handle` runs.
    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
    }
}
