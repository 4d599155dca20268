use async_trait::async_trait;
use conductor_core::{Context, Operation, Value};

use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;

/// Default handler: every operation type that reaches it is unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedHandler;

#[async_trait]
impl OperationHandler for UnsupportedHandler {
    async fn handle(
        &self,
        operation: &Operation,
        _context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        Err(OperationError::Unsupported {
            op_type: operation.op_type().to_string(),
        })
    }
}
