//! Federation operations.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{Context, FieldDeclaration, Operation, Value, ValueType};
use tracing::debug;

use super::access::FederatedAccess;
use super::library::{ExecutorFactory, ExecutorLibrary};
use super::merge::{MergeRegistry, DEFAULT_MERGE};
use super::storage::FederatedStorage;
use crate::error::OperationError;
use crate::service::executor::Executor;
use crate::service::handler::OperationHandler;
use crate::service::handlers::payload;
use crate::service::properties::Properties;

const EXECUTOR_ID_ARG: &str = "executorId";

fn admin_auth(executor: &Executor) -> Option<String> {
    executor.config().properties().admin_auth()
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Value::as_str).map(ToString::to_string).collect())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// AddExecutor
// ---------------------------------------------------------------------------

/// `AddExecutor`: builds a sub-executor from a library preset and/or custom
/// properties and registers it, owned by the caller.
pub struct AddExecutorHandler {
    storage: Arc<FederatedStorage>,
    library: Arc<ExecutorLibrary>,
    factory: Arc<dyn ExecutorFactory>,
}

impl AddExecutorHandler {
    #[must_use]
    pub fn new(
        storage: Arc<FederatedStorage>,
        library: Arc<ExecutorLibrary>,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Self {
        Self {
            storage,
            library,
            factory,
        }
    }
}

#[async_trait]
impl OperationHandler for AddExecutorHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let user = context.user();
        let id = operation.arg_str(EXECUTOR_ID_ARG).unwrap_or_default();
        let custom = operation.arg("properties");

        // Checked before anything is built or stored.
        let restricted = executor.config().properties().library_restricted_auths();
        if custom.is_some() && !restricted.is_empty() && !user.has_any(&restricted) {
            return Err(OperationError::unauthorised(format!(
                "user {} is not allowed to add executors with custom properties; requires one of: {}",
                user.user_id,
                restricted.join(", ")
            )));
        }
        if id.trim().is_empty() {
            return Err(OperationError::validation("executorId must not be blank"));
        }
        if self.storage.contains(id) {
            return Err(OperationError::Conflict(format!(
                "an executor with id {id} is already registered"
            )));
        }

        let mut properties = match operation.arg_str("libraryId") {
            Some(library_id) => self.library.get(library_id).ok_or_else(|| {
                OperationError::NotFound(format!("library entry {library_id}"))
            })?,
            None => Properties::new(),
        };
        if let Some(custom) = custom {
            properties.merge(&custom.deserialize_into::<Properties>()?);
        }

        let access = FederatedAccess {
            owner_id: user.user_id.clone(),
            auths: operation
                .arg("auths")
                .map(string_list)
                .unwrap_or_default()
                .into_iter()
                .collect(),
            is_public: operation.arg("isPublic").and_then(Value::as_bool).unwrap_or(false),
            disabled_by_default: operation
                .arg("disabledByDefault")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        let sub_executor = self.factory.create(id, &properties)?;
        self.storage.put(access, sub_executor)?;
        Ok(Value::Null)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
            .required(EXECUTOR_ID_ARG, ValueType::String)
            .optional("libraryId", ValueType::String)
            .optional("properties", ValueType::Map)
            .optional("auths", ValueType::Array)
            .optional("isPublic", ValueType::Bool)
            .optional("disabledByDefault", ValueType::Bool)
    }
}

// ---------------------------------------------------------------------------
// RemoveExecutor / GetAllExecutorIds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RemoveExecutorHandler {
    storage: Arc<FederatedStorage>,
}

impl RemoveExecutorHandler {
    #[must_use]
    pub fn new(storage: Arc<FederatedStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl OperationHandler for RemoveExecutorHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let id = operation.arg_str(EXECUTOR_ID_ARG).unwrap_or_default();
        self.storage
            .remove(id, context.user(), admin_auth(executor).as_deref())?;
        Ok(Value::Null)
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none().required(EXECUTOR_ID_ARG, ValueType::String)
    }
}

#[derive(Debug, Clone)]
pub struct GetAllExecutorIdsHandler {
    storage: Arc<FederatedStorage>,
}

impl GetAllExecutorIdsHandler {
    #[must_use]
    pub fn new(storage: Arc<FederatedStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl OperationHandler for GetAllExecutorIdsHandler {
    async fn handle(
        &self,
        _operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let ids = self.storage.ids(context.user(), admin_auth(executor).as_deref());
        Ok(Value::Array(ids.into_iter().map(Value::String).collect()))
    }
}

// ---------------------------------------------------------------------------
// FederatedOperation
// ---------------------------------------------------------------------------

/// `FederatedOperation`: runs its payload on each selected sub-executor in
/// ascending id order and folds the results with the named merge function.
/// The first sub-executor error aborts the fan-out.
#[derive(Debug, Clone)]
pub struct FederatedOperationHandler {
    storage: Arc<FederatedStorage>,
    merges: Arc<MergeRegistry>,
}

impl FederatedOperationHandler {
    #[must_use]
    pub fn new(storage: Arc<FederatedStorage>, merges: Arc<MergeRegistry>) -> Self {
        Self { storage, merges }
    }
}

#[async_trait]
impl OperationHandler for FederatedOperationHandler {
    async fn handle(
        &self,
        operation: &Operation,
        context: &Context,
        executor: &Executor,
    ) -> Result<Value, OperationError> {
        let payload = payload(operation).ok_or_else(|| {
            OperationError::validation(format!(
                "{} needs an operation to run",
                operation.op_type()
            ))
        })?;
        let merge = self
            .merges
            .get(operation.arg_str("merge").unwrap_or(DEFAULT_MERGE))?;
        let ids = operation.arg("executorIds").map(string_list);
        let targets = self.storage.select(
            ids.as_deref(),
            context.user(),
            admin_auth(executor).as_deref(),
        )?;

        let mut state = None;
        for target in &targets {
            debug!(executor_id = %target.id(), op_type = %payload.op_type(), "federating operation");
            let result = target
                .execute(payload.clone(), context)
                .await
                .map_err(|err| OperationError::federated(target.id(), err))?;
            state = Some(merge.merge(state, result)?);
        }
        Ok(state.unwrap_or_default())
    }

    fn fields(&self) -> FieldDeclaration {
        FieldDeclaration::none()
            .optional("executorIds", ValueType::Array)
            .optional("merge", ValueType::String)
    }
}
