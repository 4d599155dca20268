//! Per-request set export: `ExportToSet` stores its input under a key in the
//! context's [`SetExporter`]; `GetSetExport` reads it back later in the same
//! request.

use async_trait::async_trait;
use conductor_core::{Context, Exporter, FieldDeclaration, Operation, SetExporter, Value, ValueType};

use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;

/// Key used when an export operation names none.
pub const DEFAULT_EXPORT_KEY: &str = "ALL";

fn export_key(operation: &Operation) -> &str {
    operation.arg_str("key").unwrap_or(DEFAULT_EXPORT_KEY)
}

/// Adds its input to a named set and passes the input through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExportToSetHandler;

#[async_trait]
impl OperationHandler for ExportToSetHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let input = operation.input().cloned().unwrap_or_default();
        let values = match &input {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            single => vec![single.clone()],
        };
        context.with_exporter::<SetExporter, _>(|exporter| exporter.add(export_key(operation), values));
        Ok(input)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().optional("key", ValueType::String)
    }
}

/// Returns the values exported under a key, optionally sliced by
/// `start`/`end`. A key that was never exported is `NotFound`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GetSetExportHandler;

#[async_trait]
impl OperationHandler for GetSetExportHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        _executor: &Executor,
    ) -> Result<Value, OperationError> {
        let key = export_key(operation);
        let values = context
            .with_exporter::<SetExporter, _>(|exporter| exporter.get(key))
            .ok_or_else(|| OperationError::NotFound(format!("no export found for key {key}")))?;

        let bound = |name: &str, default: usize| -> Result<usize, OperationError> {
            match operation.arg(name).and_then(Value::as_i64) {
                None => Ok(default),
                Some(n) => usize::try_from(n)
                    .map_err(|_| OperationError::validation(format!("{name} must not be negative"))),
            }
        };
        let start = bound("start", 0)?.min(values.len());
        let end = bound("end", values.len())?.clamp(start, values.len());
        Ok(Value::Array(values[start..end].to_vec()))
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
            .optional("key", ValueType::String)
            .optional("start", ValueType::Int)
            .optional("end", ValueType::Int)
    }
}
