//! Operation-type patterns.
//!
//! Operation types are plain strings, so "this rule covers that operation"
//! is expressed with patterns: an exact type (`GetElements`), a prefix
//! family (`Get*`), or every operation (`*`). When several patterns match,
//! the most specific one wins: exact, then the longest prefix, then `*`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A pattern over operation type identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TypeMatcher {
    Exact(String),
    Prefix(String),
    Any,
}

impl TypeMatcher {
    /// Parses `*`, `Prefix*` or an exact type name.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty pattern or a `*` anywhere but the end.
    pub fn parse(pattern: &str) -> Result<Self, String> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err("operation type pattern must not be empty".to_string());
        }
        if pattern == "*" {
            return Ok(Self::Any);
        }
        match pattern.strip_suffix('*') {
            Some(prefix) if !prefix.contains('*') => Ok(Self::Prefix(prefix.to_string())),
            None if !pattern.contains('*') => Ok(Self::Exact(pattern.to_string())),
            _ => Err(format!(
                "invalid operation type pattern '{pattern}': '*' is only allowed at the end"
            )),
        }
    }

    #[must_use]
    pub fn matches(&self, op_type: &str) -> bool {
        match self {
            Self::Exact(t) => t == op_type,
            Self::Prefix(p) => op_type.starts_with(p.as_str()),
            Self::Any => true,
        }
    }

    /// Higher is more specific.
    #[must_use]
    pub fn specificity(&self) -> usize {
        match self {
            Self::Exact(_) => usize::MAX,
            Self::Prefix(p) => p.len() + 1,
            Self::Any => 0,
        }
    }
}

impl TryFrom<String> for TypeMatcher {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TypeMatcher> for String {
    fn from(m: TypeMatcher) -> Self {
        m.to_string()
    }
}

impl fmt::Display for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => f.write_str(t),
            Self::Prefix(p) => write!(f, "{p}*"),
            Self::Any => f.write_str("*"),
        }
    }
}

/// Returns the value of the most specific matching entry. Among equally
/// specific entries the first registered wins.
pub fn most_specific<'a, T>(
    entries: impl IntoIterator<Item = (&'a TypeMatcher, &'a T)>,
    op_type: &str,
) -> Option<&'a T> {
    let mut best: Option<(usize, &'a T)> = None;
    for (matcher, value) in entries {
        if !matcher.matches(op_type) {
            continue;
        }
        let rank = matcher.specificity();
        if best.map_or(true, |(r, _)| rank > r) {
            best = Some((rank, value));
        }
    }
    best.map(|(_, v)| v)
}
