//! Functions folding sub-executor results into one value.
//!
//! A merge is applied as `state = merge(state, result)` for each
//! sub-executor in turn, starting from no state.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use conductor_core::Value;
use dashmap::DashMap;

use crate::error::OperationError;

/// Merge used when a `FederatedOperation` names none.
pub const DEFAULT_MERGE: &str = "concat";

pub trait MergeFunction: Send + Sync {
    /// Folds `result` into `state`.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the result cannot be merged.
    fn merge(&self, state: Option<Value>, result: Value) -> Result<Value, OperationError>;
}

impl<F> MergeFunction for F
where
    F: Fn(Option<Value>, Value) -> Result<Value, OperationError> + Send + Sync,
{
    fn merge(&self, state: Option<Value>, result: Value) -> Result<Value, OperationError> {
        self(state, result)
    }
}

/// Named merge functions. Starts with `concat`, `sum`, `max`, `min` and
/// `last`.
pub struct MergeRegistry {
    functions: DashMap<String, Arc<dyn MergeFunction>>,
}

impl MergeRegistry {
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            functions: DashMap::new(),
        };
        registry.register("concat", concat);
        registry.register("sum", sum);
        registry.register("max", |state: Option<Value>, result: Value| {
            extreme("max", state, result, Ordering::Greater)
        });
        registry.register("min", |state: Option<Value>, result: Value| {
            extreme("min", state, result, Ordering::Less)
        });
        registry.register("last", last);
        registry
    }

    /// Adds or replaces a merge function.
    pub fn register(&self, name: impl Into<String>, function: impl MergeFunction + 'static) {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// # Errors
    ///
    /// `Validation` for an unregistered name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn MergeFunction>, OperationError> {
        self.functions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OperationError::validation(format!("unknown merge function {name}")))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for MergeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MergeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeRegistry").field("functions", &self.names()).finish()
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    }
}

/// Concatenates results into one array; array results are flattened one level.
fn concat(state: Option<Value>, result: Value) -> Result<Value, OperationError> {
    let mut items = state.map(into_items).unwrap_or_default();
    items.extend(into_items(result));
    Ok(Value::Array(items))
}

fn numeric(name: &str, value: &Value) -> Result<f64, OperationError> {
    value.as_f64().ok_or_else(|| {
        OperationError::validation(format!(
            "merge function {name} needs numeric results but got {}",
            value.value_type()
        ))
    })
}

fn sum(state: Option<Value>, result: Value) -> Result<Value, OperationError> {
    let Some(state) = state else {
        numeric("sum", &result)?;
        return Ok(result);
    };
    match (&state, &result) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.saturating_add(*b))),
        _ => Ok(Value::Float(numeric("sum", &state)? + numeric("sum", &result)?)),
    }
}

fn last(_state: Option<Value>, result: Value) -> Result<Value, OperationError> {
    Ok(result)
}

/// Keeps whichever of state and result compares as `keep` against the other.
fn extreme(name: &str, state: Option<Value>, result: Value, keep: Ordering) -> Result<Value, OperationError> {
    let candidate = numeric(name, &result)?;
    let Some(state) = state else {
        return Ok(result);
    };
    let current = numeric(name, &state)?;
    if candidate.partial_cmp(&current) == Some(keep) {
        Ok(result)
    } else {
        Ok(state)
    }
}
