//! Small value handlers over array inputs.

use async_trait::async_trait;
use conductor_core::{Context, FieldDeclaration, Operation, Value, ValueType};

use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;

fn input_items(operation: &Operation) -> Vec<Value> {
    match operation.input() {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    }
}

/// Number of items in the input. A scalar counts as one item.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountHandler;

#[async_trait]
impl OperationHandler for CountHandler {
    async fn handle(
        &self,
        operation: &Operation,
        _context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let count = i64::try_from(input_items(operation).len()).unwrap_or(i64::MAX);
        Ok(Value::Int(count))
    }
}

/// First `resultLimit` items of the input. With `truncate` set to false an
/// input larger than the limit is an error instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct LimitHandler;

#[async_trait]
impl OperationHandler for LimitHandler {
    async fn handle(
        &self,
        operation: &Operation,
        _context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let limit = operation
            .arg("resultLimit")
            .and_then(Value::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| OperationError::validation("resultLimit must be a non-negative integer"))?;
        let truncate = operation
            .arg("truncate")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut items = input_items(operation);
        if items.len() > limit {
            if !truncate {
                return Err(OperationError::validation(format!(
                    "limit of {limit} exceeded"
                )));
            }
            items.truncate(limit);
        }
        Ok(Value::Array(items))
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
            .required("resultLimit", ValueType::Int)
            .optional("truncate", ValueType::Bool)
    }
}

#[cfg(test)]
mod tests {
    use conductor_core::{op_types, User};

    use super::*;
    use crate::error::Status;
    use crate::service::config::Config;
    use crate::service::handlers::register_builtins;

    fn executor() -> Executor {
        Executor::new("values", register_builtins(Config::builder()).build().unwrap())
    }

    fn items(n: i64) -> Value {
        Value::Array((0..n).map(Value::Int).collect())
    }

    #[tokio::test]
    async fn limit_then_count() {
        let chain = Operation::chain(vec![
            Operation::new(op_types::LIMIT)
                .with_arg("resultLimit", 3)
                .with_input(items(10)),
            Operation::new(op_types::COUNT).accepting_input(),
        ]);
        let result = executor()
            .execute(chain, &Context::new(User::new("u")))
            .await
            .unwrap();
        assert_eq!(result, Value::Int(3));
    }

    #[tokio::test]
    async fn count_of_nothing_is_zero() {
        let result = executor()
            .execute(
                Operation::new(op_types::COUNT).accepting_input(),
                &Context::new(User::new("u")),
            )
            .await
            .unwrap();
        assert_eq!(result, Value::Int(0));
    }

    #[tokio::test]
    async fn limit_without_truncation_rejects_large_input() {
        let op = Operation::new(op_types::LIMIT)
            .with_arg("resultLimit", 2)
            .with_arg("truncate", false)
            .with_input(items(5));
        let err = executor()
            .execute(op, &Context::new(User::new("u")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::BadRequest);
        assert!(err.to_string().contains("limit of 2 exceeded"));
    }

    #[tokio::test]
    async fn limit_requires_result_limit() {
        let err = executor()
            .execute(Operation::new(op_types::LIMIT), &Context::new(User::new("u")))
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Validation { .. }));
    }
}
