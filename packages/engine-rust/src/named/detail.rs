use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use conductor_core::{Operation, User, Value, ValueType};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::OperationError;

/// Matches `"${name}"` (quoted) first, then bare `${name}`.
const PLACEHOLDER_PATTERN: &str = r#""\$\{(\w+)\}"|\$\{(\w+)\}"#;

fn placeholder() -> Result<&'static Regex, OperationError> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(PLACEHOLDER_PATTERN))
        .as_ref()
        .map_err(|err| OperationError::Internal(anyhow::anyhow!("placeholder pattern: {err}")))
}

fn placeholder_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str())
}

/// A declared parameter of a named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "valueType", default = "any_type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
    /// Allowed values; `None` allows anything of the declared type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
}

fn any_type() -> ValueType {
    ValueType::Any
}

impl ParameterDetail {
    #[must_use]
    pub fn new(value_type: ValueType) -> Self {
        Self {
            description: None,
            value_type,
            default_value: None,
            required: false,
            options: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<Value>) -> Self {
        self.options = Some(options);
        self
    }

    /// Checks a concrete value against the declared type and allowed set.
    fn check(&self, name: &str, value: &Value) -> Result<(), String> {
        if !self.value_type.accepts(value) {
            return Err(format!(
                "parameter '{name}' must be of type {} but was {}",
                self.value_type,
                value.value_type()
            ));
        }
        if let Some(options) = &self.options {
            if !options.contains(value) {
                return Err(format!(
                    "value {} for parameter '{name}' is not one of the allowed values",
                    value.to_json()
                ));
            }
        }
        Ok(())
    }
}

/// A stored named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedOperationDetail {
    pub operation_name: String,
    #[serde(default)]
    pub creator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON text of the stored operation or chain, with `${param}`
    /// placeholders.
    pub operations: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterDetail>,
    #[serde(default)]
    pub read_access_roles: Vec<String>,
    #[serde(default)]
    pub write_access_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<i64>,
}

impl NamedOperationDetail {
    #[must_use]
    pub fn new(
        operation_name: impl Into<String>,
        creator_id: impl Into<String>,
        operations: impl Into<String>,
    ) -> Self {
        Self {
            operation_name: operation_name.into(),
            creator_id: creator_id.into(),
            description: None,
            operations: operations.into(),
            parameters: BTreeMap::new(),
            read_access_roles: Vec::new(),
            write_access_roles: Vec::new(),
            score: None,
        }
    }

    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, parameter: ParameterDetail) -> Self {
        self.parameters.insert(name.into(), parameter);
        self
    }

    #[must_use]
    pub fn with_read_roles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, roles: I) -> Self {
        self.read_access_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_write_roles<I: IntoIterator<Item = S>, S: Into<String>>(mut self, roles: I) -> Self {
        self.write_access_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    fn has_access(&self, roles: &[String], user: &User, admin_auth: Option<&str>) -> bool {
        user.user_id == self.creator_id
            || user.has_any(roles)
            || admin_auth.is_some_and(|auth| user.has_auth(auth))
    }

    #[must_use]
    pub fn has_read_access(&self, user: &User, admin_auth: Option<&str>) -> bool {
        self.has_access(&self.read_access_roles, user, admin_auth)
    }

    #[must_use]
    pub fn has_write_access(&self, user: &User, admin_auth: Option<&str>) -> bool {
        self.has_access(&self.write_access_roles, user, admin_auth)
    }

    /// Parameter names referenced by a placeholder in the stored text.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the placeholder pattern failed to compile.
    pub fn referenced_parameters(&self) -> Result<BTreeSet<String>, OperationError> {
        Ok(placeholder()?
            .captures_iter(&self.operations)
            .map(|caps| placeholder_name(&caps).to_string())
            .collect())
    }

    /// Definition-time checks, all reported together: a non-blank name,
    /// every declared parameter referenced, defaults of the right type and
    /// within the allowed values, and a chain that parses once filled with
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns `Validation` listing every problem found.
    pub fn validate(&self) -> Result<(), OperationError> {
        let mut errors = Vec::new();
        if self.operation_name.trim().is_empty() {
            errors.push("operation name must not be blank".to_string());
        }
        let referenced = self.referenced_parameters()?;
        for (name, parameter) in &self.parameters {
            if !referenced.contains(name) {
                errors.push(format!(
                    "parameter '{name}' is declared but never referenced by the operation chain"
                ));
            }
            if let Some(default) = &parameter.default_value {
                if let Err(problem) = parameter.check(name, default) {
                    errors.push(format!("default {problem}"));
                }
            }
        }
        if errors.is_empty() {
            let values = self
                .parameters
                .iter()
                .map(|(name, p)| (name.clone(), p.default_value.clone().unwrap_or_default()))
                .collect();
            if let Err(err) = self.parse(&values) {
                errors.extend(match err {
                    OperationError::Validation { errors } => errors,
                    other => vec![other.to_string()],
                });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OperationError::Validation { errors })
        }
    }

    /// Builds the operation for one invocation. Each declared parameter takes
    /// the supplied value, else its default, else `null` when optional.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for undeclared parameters, missing required
    /// parameters, type mismatches, values outside the allowed set, or
    /// substituted text that does not parse.
    pub fn resolve(&self, supplied: &BTreeMap<String, Value>) -> Result<Operation, OperationError> {
        let mut errors: Vec<String> = supplied
            .keys()
            .filter(|name| !self.parameters.contains_key(*name))
            .map(|name| {
                format!(
                    "parameter '{name}' is not declared by named operation {}",
                    self.operation_name
                )
            })
            .collect();

        let mut values = BTreeMap::new();
        for (name, parameter) in &self.parameters {
            match supplied.get(name).or(parameter.default_value.as_ref()) {
                Some(value) => match parameter.check(name, value) {
                    Ok(()) => {
                        values.insert(name.clone(), value.clone());
                    }
                    Err(problem) => errors.push(problem),
                },
                None if parameter.required => {
                    errors.push(format!("missing required parameter '{name}'"));
                }
                None => {
                    values.insert(name.clone(), Value::Null);
                }
            }
        }

        if !errors.is_empty() {
            return Err(OperationError::Validation { errors });
        }
        self.parse(&values)
    }

    fn parse(&self, values: &BTreeMap<String, Value>) -> Result<Operation, OperationError> {
        let text = substitute(&self.operations, values)?;
        Operation::from_json(&text).map_err(|err| {
            OperationError::validation(format!(
                "named operation {} does not parse: {err}",
                self.operation_name
            ))
        })
    }
}

/// Replaces every placeholder that has a value. A quoted placeholder, or a
/// bare one outside a string literal, takes the value's JSON text. A bare
/// placeholder inside a string literal takes the value as string content,
/// with `null` rendering as nothing. Placeholders without a value are left
/// as they are.
fn substitute(text: &str, values: &BTreeMap<String, Value>) -> Result<String, OperationError> {
    let mut failure = None;
    let replaced = placeholder()?.replace_all(text, |caps: &Captures<'_>| {
        let Some(value) = values.get(placeholder_name(caps)) else {
            return caps[0].to_string();
        };
        let bare = caps.get(2).is_some();
        if !(bare && inside_string(text, caps.get(0).map_or(0, |m| m.start()))) {
            return value.to_json();
        }
        let content = match value {
            Value::Null => return String::new(),
            Value::String(raw) => raw.clone(),
            other => other.to_json(),
        };
        match serde_json::to_string(&content) {
            Ok(quoted) => quoted[1..quoted.len() - 1].to_string(),
            Err(err) => {
                failure = Some(err);
                String::new()
            }
        }
    });
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(replaced.into_owned()),
    }
}

/// Whether byte `offset` of JSON `text` lies inside a string literal.
fn inside_string(text: &str, offset: usize) -> bool {
    let mut in_string = false;
    let mut escaped = false;
    for byte in text.as_bytes().iter().take(offset) {
        match (in_string, escaped, byte) {
            (true, true, _) => escaped = false,
            (true, false, b'\\') => escaped = true,
            (_, _, b'"') => in_string = !in_string,
            _ => {}
        }
    }
    in_string
}
