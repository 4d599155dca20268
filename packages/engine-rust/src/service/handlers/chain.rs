use async_trait::async_trait;
use conductor_core::{Context, Operation, Value};
use tracing::trace;

use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;

/// Runs the children of an `OperationChain` in order.
///
/// Each child is cloned before execution, so running the same chain twice
/// behaves identically. A child that accepts input and has none set
/// receives the previous child's output; the chain's own input seeds the
/// first child under the same rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChainHandler;

#[async_trait]
impl OperationHandler for ChainHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let mut carried = operation.input().cloned();
        let mut result = Value::Null;
        for (index, child) in operation.children().iter().enumerate() {
            let mut child = child.clone();
            if let Some(input) = carried.take() {
                if child.inject_input(&input) {
                    trace!(index, op_type = %child.op_type(), "spliced previous output into input");
                }
            }
            result = executor.execute(child, context).await?;
            carried = Some(result.clone());
        }
        Ok(result)
    }
}
