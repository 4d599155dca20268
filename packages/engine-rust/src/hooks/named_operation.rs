//! Expands `NamedOperation` references into their stored chains.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{op_types, Operation, User, Value};
use tracing::debug;

use crate::error::OperationError;
use crate::named::{NamedOperationCache, OPERATION_NAME_ARG, PARAMETERS_ARG};
use crate::service::hook::{Hook, Request};
use crate::service::properties::DEFAULT_NAMED_MAX_DEPTH;

/// Replaces every `NamedOperation` reference in the request with the
/// operations it stands for, recursively, splicing them flat into the
/// enclosing composite.
///
/// References that are not in the cache are left as they are; the default
/// handler then reports them. References the caller may not read fail the
/// request.
#[derive(Debug, Clone)]
pub struct NamedOperationResolver {
    cache: Arc<NamedOperationCache>,
    admin_auth: Option<String>,
    max_depth: usize,
}

impl NamedOperationResolver {
    #[must_use]
    pub fn new(cache: Arc<NamedOperationCache>) -> Self {
        Self {
            cache,
            admin_auth: None,
            max_depth: DEFAULT_NAMED_MAX_DEPTH,
        }
    }

    #[must_use]
    pub fn with_admin_auth(mut self, admin_auth: Option<String>) -> Self {
        self.admin_auth = admin_auth;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Rewrites the children of a composite in place.
    fn resolve_children(
        &self,
        operation: &mut Operation,
        user: &User,
        path: &mut Vec<String>,
    ) -> Result<(), OperationError> {
        if !operation.is_composite() {
            return Ok(());
        }
        let mut resolved = Vec::new();
        for child in operation.take_children() {
            resolved.extend(self.resolve(child, user, path)?);
        }
        operation.replace_children(resolved);
        Ok(())
    }

    /// The operations `operation` stands for once every reference in it is
    /// expanded.
    fn resolve(
        &self,
        mut operation: Operation,
        user: &User,
        path: &mut Vec<String>,
    ) -> Result<Vec<Operation>, OperationError> {
        if operation.is_type(op_types::NAMED_OPERATION) {
            return self.expand(operation, user, path);
        }
        self.resolve_children(&mut operation, user, path)?;
        Ok(vec![operation])
    }

    fn expand(
        &self,
        reference: Operation,
        user: &User,
        path: &mut Vec<String>,
    ) -> Result<Vec<Operation>, OperationError> {
        let Some(name) = reference.arg_str(OPERATION_NAME_ARG).map(ToString::to_string) else {
            return Err(OperationError::validation(format!(
                "{} requires an {OPERATION_NAME_ARG}",
                op_types::NAMED_OPERATION
            )));
        };
        if path.contains(&name) {
            return Err(OperationError::validation(format!(
                "named operation {name} refers to itself via {}",
                path.join(" -> ")
            )));
        }
        if path.len() >= self.max_depth {
            return Err(OperationError::validation(format!(
                "named operations nested deeper than {} levels",
                self.max_depth
            )));
        }

        let detail = match self.cache.get(&name, user, self.admin_auth.as_deref()) {
            Ok(detail) => detail,
            Err(OperationError::NotFound(_)) => {
                debug!(%name, "named operation not found; leaving reference in place");
                return Ok(vec![reference]);
            }
            Err(other) => return Err(other),
        };

        let parameters: BTreeMap<String, Value> = reference
            .arg(PARAMETERS_ARG)
            .and_then(Value::as_map)
            .cloned()
            .unwrap_or_default();
        let mut expansion = detail.resolve(&parameters)?;
        let mut operations = if expansion.is_type(op_types::OPERATION_CHAIN) {
            expansion.take_children()
        } else {
            vec![expansion]
        };
        if let (Some(input), Some(first)) = (reference.input(), operations.first_mut()) {
            first.inject_input(input);
        }

        path.push(name);
        let mut resolved = Vec::with_capacity(operations.len());
        for operation in operations {
            resolved.extend(self.resolve(operation, user, path)?);
        }
        path.pop();
        Ok(resolved)
    }
}

#[async_trait]
impl Hook for NamedOperationResolver {
    fn name(&self) -> &'static str {
        "NamedOperationResolver"
    }

    async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
        let user = request.user();
        let mut path = Vec::new();
        if request.operation().is_type(op_types::NAMED_OPERATION) {
            // A bare reference is resolved as the sole child of a chain.
            let reference = request.replace_operation(Operation::chain(Vec::new()));
            let expanded = self.expand(reference, user, &mut path)?;
            request.operation_mut().replace_children(expanded);
            return Ok(());
        }
        self.resolve_children(request.operation_mut(), user, &mut path)
    }
}
