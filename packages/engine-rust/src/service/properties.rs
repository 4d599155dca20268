//! Free-form property bag attached to every executor configuration.
//!
//! Values are strings or JSON objects. The engine reads the keys in
//! [`keys`]; everything else is passed through untouched for external
//! collaborators.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

/// Property keys read by the engine.
pub mod keys {
    /// Worker pool size for background jobs.
    pub const JOB_EXECUTOR_THREADS: &str = "conductor.job.executor.threads";
    /// Comma-separated auths required to add federated executors with custom
    /// properties.
    pub const LIBRARY_RESTRICTED_AUTHS: &str = "conductor.federation.library.restricted.auths";
    /// Auth granting access to every named operation and federated executor.
    pub const ADMIN_AUTH: &str = "conductor.admin.auth";
    /// Include full diagnostics in error reports.
    pub const ERROR_DEBUG: &str = "conductor.error.debug";
    /// Maximum nesting of named operations inside named operations.
    pub const NAMED_MAX_DEPTH: &str = "conductor.named.max.depth";
    /// Concurrent requests accepted by the service pipeline before shedding.
    pub const SERVICE_USER_MAX_CONCURRENT: &str = "conductor.service.user.max.concurrent";
    /// Default request timeout applied by the service pipeline.
    pub const SERVICE_TIMEOUT_MS: &str = "conductor.service.timeout.ms";
    /// JSON authorisation rules for the `OperationAuthoriser` hook.
    pub const HOOK_AUTHORISER: &str = "conductor.hooks.authoriser";
    /// JSON score table for the `OperationChainLimiter` hook.
    pub const HOOK_SCORES: &str = "conductor.hooks.scores";
    /// JSON insertion config for the `AddOperationsToChain` hook.
    pub const HOOK_ADD_TO_CHAIN: &str = "conductor.hooks.add_to_chain";
}

pub const DEFAULT_JOB_EXECUTOR_THREADS: usize = 4;
pub const DEFAULT_NAMED_MAX_DEPTH: usize = 32;

/// Key/value configuration bag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, serde_json::Value>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads properties from a JSON object file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a JSON object.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading properties file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses properties from JSON object text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a JSON object.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    /// Copies every entry of `other` over this bag.
    pub fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.entries {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.entries.iter()
    }

    /// String form of a property. Non-string scalars are rendered as JSON.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.entries.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Parses a numeric property given as a number or a numeric string.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is present but not a non-negative integer.
    pub fn get_usize(&self, key: &str) -> anyhow::Result<Option<usize>> {
        match self.get_str(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map(Some)
                .with_context(|| format!("property {key} must be a non-negative integer, got {raw}")),
        }
    }

    /// Parses a boolean property given as `true`/`false` in any case.
    ///
    /// # Errors
    ///
    /// Returns an error if the property is present but not a boolean.
    pub fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        match self.get_str(key) {
            None => Ok(None),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => anyhow::bail!("property {key} must be true or false, got {raw}"),
            },
        }
    }

    /// Comma-separated list property; blank items are dropped.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get_str(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deserializes a property holding a JSON object (or JSON text).
    ///
    /// # Errors
    ///
    /// Returns an error if the property does not match `T`.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let Some(value) = self.entries.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            serde_json::Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        };
        parsed
            .map(Some)
            .with_context(|| format!("property {key} has an invalid shape"))
    }

    #[must_use]
    pub fn job_executor_threads(&self) -> usize {
        self.get_usize(keys::JOB_EXECUTOR_THREADS)
            .ok()
            .flatten()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_JOB_EXECUTOR_THREADS)
    }

    #[must_use]
    pub fn library_restricted_auths(&self) -> Vec<String> {
        self.get_list(keys::LIBRARY_RESTRICTED_AUTHS)
    }

    #[must_use]
    pub fn admin_auth(&self) -> Option<String> {
        self.get_str(keys::ADMIN_AUTH).filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn error_debug(&self) -> bool {
        self.get_bool(keys::ERROR_DEBUG).ok().flatten().unwrap_or(false)
    }

    #[must_use]
    pub fn named_max_depth(&self) -> usize {
        self.get_usize(keys::NAMED_MAX_DEPTH)
            .ok()
            .flatten()
            .unwrap_or(DEFAULT_NAMED_MAX_DEPTH)
    }

    /// Checks that every key the engine reads has a usable value.
    ///
    /// # Errors
    ///
    /// Returns the first malformed engine property.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.get_usize(keys::JOB_EXECUTOR_THREADS)?;
        self.get_usize(keys::NAMED_MAX_DEPTH)?;
        self.get_usize(keys::SERVICE_USER_MAX_CONCURRENT)?;
        self.get_usize(keys::SERVICE_TIMEOUT_MS)?;
        self.get_bool(keys::ERROR_DEBUG)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn documented_defaults() {
        let props = Properties::new();
        assert_eq!(props.job_executor_threads(), DEFAULT_JOB_EXECUTOR_THREADS);
        assert!(props.library_restricted_auths().is_empty());
        assert!(props.admin_auth().is_none());
        assert!(!props.error_debug());
        assert_eq!(props.named_max_depth(), DEFAULT_NAMED_MAX_DEPTH);
    }

    #[test]
    fn numbers_accept_strings_and_json_numbers() {
        let props = Properties::new()
            .with(keys::JOB_EXECUTOR_THREADS, "8")
            .with(keys::NAMED_MAX_DEPTH, 5);
        assert_eq!(props.job_executor_threads(), 8);
        assert_eq!(props.named_max_depth(), 5);
    }

    #[test]
    fn restricted_auths_are_comma_separated() {
        let props = Properties::new().with(keys::LIBRARY_RESTRICTED_AUTHS, " admin, ops ,,");
        assert_eq!(props.library_restricted_auths(), vec!["admin", "ops"]);
    }

    #[test]
    fn malformed_engine_keys_fail_validation() {
        let props = Properties::new().with(keys::JOB_EXECUTOR_THREADS, "many");
        assert!(props.validate().is_err());
        let props = Properties::new().with(keys::ERROR_DEBUG, "yes");
        assert!(props.validate().is_err());
        assert!(Properties::new().with(keys::ERROR_DEBUG, true).validate().is_ok());
    }

    #[test]
    fn json_property_accepts_object_or_text() {
        #[derive(Deserialize)]
        struct Shape {
            n: i64,
        }
        let props = Properties::new()
            .with("a", serde_json::json!({"n": 1}))
            .with("b", r#"{"n": 2}"#);
        assert_eq!(props.get_json::<Shape>("a").unwrap().unwrap().n, 1);
        assert_eq!(props.get_json::<Shape>("b").unwrap().unwrap().n, 2);
        assert!(props.get_json::<Shape>("missing").unwrap().is_none());
    }

    #[test]
    fn merge_overrides_existing_keys() {
        let mut base = Properties::new().with("x", "1").with("y", "2");
        base.merge(&Properties::new().with("y", "3"));
        assert_eq!(base.get_str("x").as_deref(), Some("1"));
        assert_eq!(base.get_str("y").as_deref(), Some("3"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"{}": "admin", "cache.backend": "memory"}}"#, keys::ADMIN_AUTH).unwrap();
        let props = Properties::from_file(file.path()).unwrap();
        assert_eq!(props.admin_auth().as_deref(), Some("admin"));
        assert_eq!(props.get_str("cache.backend").as_deref(), Some("memory"));
    }
}
