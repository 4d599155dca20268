//! Admin operations over the named-operation cache.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{Context, FieldDeclaration, Operation, Value, ValueType};

use super::cache::NamedOperationCache;
use super::detail::{NamedOperationDetail, ParameterDetail};
use super::OPERATION_NAME_ARG;
use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;

fn admin_auth(executor: &Executor) -> Option<String> {
    executor.config().properties().admin_auth()
}

fn string_list(operation: &Operation, name: &str) -> Vec<String> {
    operation
        .arg(name)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(ToString::to_string).collect())
        .unwrap_or_default()
}

/// `AddNamedOperation`: validates and stores a definition created by the
/// caller.
#[derive(Debug, Clone)]
pub struct AddNamedOperationHandler {
    cache: Arc<NamedOperationCache>,
}

impl AddNamedOperationHandler {
    #[must_use]
    pub fn new(cache: Arc<NamedOperationCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl OperationHandler for AddNamedOperationHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let name = operation.arg_str(OPERATION_NAME_ARG).unwrap_or_default();
        // The chain may be given as JSON text or as a JSON object.
        let chain_text = match operation.arg("operationChain") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_json(),
            None => String::new(),
        };
        let parameters: BTreeMap<String, ParameterDetail> = match operation.arg("parameters") {
            Some(value) => value.deserialize_into()?,
            None => BTreeMap::new(),
        };

        let mut detail = NamedOperationDetail::new(name, context.user_id(), chain_text);
        detail.description = operation.arg_str("description").map(ToString::to_string);
        detail.parameters = parameters;
        detail.read_access_roles = string_list(operation, "readAccessRoles");
        detail.write_access_roles = string_list(operation, "writeAccessRoles");
        detail.score = operation.arg("score").and_then(Value::as_i64);
        detail.validate()?;

        let overwrite = operation
            .arg("overwriteFlag")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.cache
            .add(detail, overwrite, context.user(), admin_auth(executor).as_deref())?;
        Ok(Value::Null)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
            .required(OPERATION_NAME_ARG, ValueType::String)
            .required("operationChain", ValueType::Any)
            .optional("description", ValueType::String)
            .optional("parameters", ValueType::Map)
            .optional("readAccessRoles", ValueType::Array)
            .optional("writeAccessRoles", ValueType::Array)
            .optional("score", ValueType::Int)
            .optional("overwriteFlag", ValueType::Bool)
    }
}

/// `GetAllNamedOperations`: every definition the caller may read.
#[derive(Debug, Clone)]
pub struct GetAllNamedOperationsHandler {
    cache: Arc<NamedOperationCache>,
}

impl GetAllNamedOperationsHandler {
    #[must_use]
    pub fn new(cache: Arc<NamedOperationCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl OperationHandler for GetAllNamedOperationsHandler {
    async fn handle(
        &self,
        _operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let details = self
            .cache
            .get_all(context.user(), admin_auth(executor).as_deref());
        Ok(Value::from_serialize(&details)?)
    }
}

/// `DeleteNamedOperation`.
#[derive(Debug, Clone)]
pub struct DeleteNamedOperationHandler {
    cache: Arc<NamedOperationCache>,
}

impl DeleteNamedOperationHandler {
    #[must_use]
    pub fn new(cache: Arc<NamedOperationCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl OperationHandler for DeleteNamedOperationHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let name = operation.arg_str(OPERATION_NAME_ARG).unwrap_or_default();
        self.cache
            .delete(name, context.user(), admin_auth(executor).as_deref())?;
        Ok(Value::Null)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().required(OPERATION_NAME_ARG, ValueType::String)
    }
}
