use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Generic runtime value carried by operation arguments, inputs and results.
///
/// Supports all JSON-compatible types. Serializes untagged so that a value
/// renders as plain JSON (`1`, `"a"`, `[..]`), which is what stored
/// named-operation chains and federated merge results are written in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. Uses `BTreeMap` for deterministic serialization order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Runtime type of this value, used for field validation.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Bool(_) => ValueType::Bool,
            Self::Int(_) => ValueType::Int,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
            Self::Map(_) => ValueType::Map,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float` values.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Converts any serializable value into a `Value` through its JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON.
    pub fn from_serialize<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(value)?)
    }

    /// Converts this value into any deserializable type through its JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON shape does not match `T`.
    pub fn deserialize_into<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    /// Compact JSON text of this value.
    #[must_use]
    pub fn to_json(&self) -> String {
        // A `Value` is JSON by construction, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Map(v)
    }
}

/// Declared type of an operation field or named-operation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Matches every value, including `Null`.
    Any,
    Null,
    Bool,
    Int,
    Float,
    /// `Int` or `Float`.
    Number,
    String,
    Array,
    Map,
}

impl ValueType {
    /// Whether a value of this runtime type satisfies the declaration.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Number => matches!(value, Value::Int(_) | Value::Float(_)),
            declared => value.value_type() == declared,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User id assigned to callers that did not authenticate.
pub const UNKNOWN_USER_ID: &str = "UNKNOWN";

/// The invoking principal: a user id plus the operation auths it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier for the caller.
    pub user_id: String,
    /// Authorization tokens held by the caller.
    #[serde(default)]
    pub op_auths: BTreeSet<String>,
}

impl User {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            op_auths: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_auths<I, S>(mut self, auths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.op_auths.extend(auths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn has_auth(&self, auth: &str) -> bool {
        self.op_auths.contains(auth)
    }

    /// True if the user holds at least one of `auths`.
    #[must_use]
    pub fn has_any<'a, I>(&self, auths: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        auths.into_iter().any(|a| self.op_auths.contains(a))
    }

    /// True if the user holds every one of `auths`. Vacuously true when empty.
    #[must_use]
    pub fn has_all<'a, I>(&self, auths: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        auths.into_iter().all(|a| self.op_auths.contains(a))
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new(UNKNOWN_USER_ID)
    }
}
