//! The operation model: a typed request with named arguments, an optional
//! input slot, caller hints, and (for composites) an ordered list of children.

use std::collections::BTreeMap;
use std::mem;

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Well-known operation type identifiers.
pub mod op_types {
    /// Sequential composite; each child's output feeds the next child's input.
    pub const OPERATION_CHAIN: &str = "OperationChain";
    /// Reference to a stored, parameterized chain.
    pub const NAMED_OPERATION: &str = "NamedOperation";
    pub const ADD_NAMED_OPERATION: &str = "AddNamedOperation";
    pub const GET_ALL_NAMED_OPERATIONS: &str = "GetAllNamedOperations";
    pub const DELETE_NAMED_OPERATION: &str = "DeleteNamedOperation";
    pub const EXPORT_TO_SET: &str = "ExportToSet";
    pub const GET_SET_EXPORT: &str = "GetSetExport";
    pub const COUNT: &str = "Count";
    pub const LIMIT: &str = "Limit";
    pub const EXECUTE_JOB: &str = "ExecuteJob";
    pub const GET_JOB_DETAILS: &str = "GetJobDetails";
    pub const GET_ALL_JOB_DETAILS: &str = "GetAllJobDetails";
    pub const CANCEL_SCHEDULED_JOB: &str = "CancelScheduledJob";
    pub const ADD_EXECUTOR: &str = "AddExecutor";
    pub const REMOVE_EXECUTOR: &str = "RemoveExecutor";
    pub const GET_ALL_EXECUTOR_IDS: &str = "GetAllExecutorIds";
    pub const FEDERATED_OPERATION: &str = "FederatedOperation";
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A declarative request routed by its type identifier.
///
/// An operation is *composite* when it carries a child list (`operations`).
/// Handlers and hooks only rely on the capability accessors below, never on
/// the concrete operation type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    op_type: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    args: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    input: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    accepts_input: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operations: Option<Vec<Operation>>,
}

impl Operation {
    /// Creates a leaf operation of the given type with no arguments.
    #[must_use]
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            args: BTreeMap::new(),
            input: None,
            accepts_input: false,
            options: BTreeMap::new(),
            operations: None,
        }
    }

    /// Creates a composite operation of the given type.
    #[must_use]
    pub fn composite(op_type: impl Into<String>, children: Vec<Operation>) -> Self {
        let mut op = Self::new(op_type);
        op.operations = Some(children);
        op
    }

    /// Creates an `OperationChain`. Chains accept input, which seeds their
    /// first child.
    #[must_use]
    pub fn chain(children: Vec<Operation>) -> Self {
        let mut op = Self::composite(op_types::OPERATION_CHAIN, children);
        op.accepts_input = true;
        op
    }

    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Declares that this operation accepts input, without setting any.
    #[must_use]
    pub fn accepting_input(mut self) -> Self {
        self.accepts_input = true;
        self
    }

    /// Sets the input slot; implies the operation accepts input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<Value>) -> Self {
        self.accepts_input = true;
        self.input = Some(input.into());
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// The type identifier this operation is routed by. Fixed at construction.
    #[must_use]
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    #[must_use]
    pub fn is_type(&self, op_type: &str) -> bool {
        self.op_type == op_type
    }

    #[must_use]
    pub fn args(&self) -> &BTreeMap<String, Value> {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.args
    }

    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// String argument, if present and a string.
    #[must_use]
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.arg(name).and_then(Value::as_str)
    }

    pub fn set_arg(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.args.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn accepts_input(&self) -> bool {
        self.accepts_input
    }

    #[must_use]
    pub fn input(&self) -> Option<&Value> {
        self.input.as_ref()
    }

    /// Sets the input slot. Ignored for operations that do not accept input.
    pub fn set_input(&mut self, input: Value) {
        if self.accepts_input {
            self.input = Some(input);
        }
    }

    pub fn take_input(&mut self) -> Option<Value> {
        self.input.take()
    }

    /// Fills the input slot only when it accepts input and is currently
    /// unset. Returns whether the value was injected.
    pub fn inject_input(&mut self, input: &Value) -> bool {
        if self.accepts_input && self.input.is_none() {
            self.input = Some(input.clone());
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    #[must_use]
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.options.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.operations.is_some()
    }

    /// Children of a composite; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[Operation] {
        self.operations.as_deref().unwrap_or(&[])
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Operation>> {
        self.operations.as_mut()
    }

    /// Swaps in a new child list, returning the previous one. The whole list
    /// is replaced in one move, so no reader can see a half-built sequence.
    /// A leaf becomes composite.
    pub fn replace_children(&mut self, children: Vec<Operation>) -> Vec<Operation> {
        mem::replace(self.operations.get_or_insert_with(Vec::new), children)
    }

    /// Removes and returns the children, leaving an empty list in place.
    pub fn take_children(&mut self) -> Vec<Operation> {
        self.operations.as_mut().map(mem::take).unwrap_or_default()
    }

    /// Depth-first, post-order walk: every child is visited before its
    /// parent. Stops at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `visit`.
    pub fn try_visit_post_order<'a, E>(
        &'a self,
        visit: &mut impl FnMut(&'a Operation) -> Result<(), E>,
    ) -> Result<(), E> {
        for child in self.children() {
            child.try_visit_post_order(visit)?;
        }
        visit(self)
    }

    /// Parses an operation from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// JSON form of this operation.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument cannot be serialized.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
