//! Inserts configured operations into every request.

use std::collections::BTreeMap;

use async_trait::async_trait;
use conductor_core::{op_types, Operation, User};
use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::service::hook::{Hook, Request};

/// Operations to add at the start and end of the root chain, and around
/// operations of given types at any chain depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertionSet {
    #[serde(default)]
    pub start: Vec<Operation>,
    #[serde(default)]
    pub end: Vec<Operation>,
    #[serde(default)]
    pub before: BTreeMap<String, Vec<Operation>>,
    #[serde(default)]
    pub after: BTreeMap<String, Vec<Operation>>,
}

/// Default insertion set plus overrides keyed by auth.
///
/// ```json
/// {"end": [{"type": "Limit", "args": {"resultLimit": 100}, "acceptsInput": true}],
///  "authorisedOps": {"admin": {}}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToChainConfig {
    #[serde(flatten)]
    pub default: InsertionSet,
    #[serde(default)]
    pub authorised_ops: BTreeMap<String, InsertionSet>,
}

impl AddToChainConfig {
    /// The override for the first (in lexicographic order) auth the user
    /// holds, else the default set.
    #[must_use]
    pub fn select(&self, user: &User) -> &InsertionSet {
        self.authorised_ops
            .iter()
            .find(|(auth, _)| user.has_auth(auth))
            .map_or(&self.default, |(_, set)| set)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddOperationsToChain {
    config: AddToChainConfig,
}

impl AddOperationsToChain {
    #[must_use]
    pub fn new(config: AddToChainConfig) -> Self {
        Self { config }
    }
}

fn surround(operations: Vec<Operation>, set: &InsertionSet) -> Vec<Operation> {
    let mut out = Vec::with_capacity(operations.len());
    for mut operation in operations {
        if let Some(before) = set.before.get(operation.op_type()) {
            out.extend(before.iter().cloned());
        }
        if operation.is_type(op_types::OPERATION_CHAIN) {
            let children = operation.take_children();
            operation.replace_children(surround(children, set));
        }
        let after = set.after.get(operation.op_type());
        out.push(operation);
        if let Some(after) = after {
            out.extend(after.iter().cloned());
        }
    }
    out
}

#[async_trait]
impl Hook for AddOperationsToChain {
    fn name(&self) -> &'static str {
        "AddOperationsToChain"
    }

    async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
        let set = self.config.select(request.user());
        if !request.operation().is_type(op_types::OPERATION_CHAIN) {
            let root = request.replace_operation(Operation::chain(Vec::new()));
            request.operation_mut().replace_children(vec![root]);
        }
        let root = request.operation_mut();
        let children = root.take_children();
        let mut rebuilt = set.start.clone();
        rebuilt.extend(surround(children, set));
        rebuilt.extend(set.end.iter().cloned());
        root.replace_children(rebuilt);
        Ok(())
    }
}
