//! Cost model for operation trees.
//!
//! A [`ScoreTable`] scores a tree by structural summation: a composite
//! scores the sum of its children, a leaf uses a custom [`ScoreResolver`]
//! registered for its exact type, else the most specific matching table
//! entry, else [`DEFAULT_OPERATION_SCORE`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use conductor_core::{most_specific, Operation, TypeMatcher, User};
use serde::Deserialize;

use crate::error::OperationError;

/// Score of a leaf with no table entry and no resolver.
pub const DEFAULT_OPERATION_SCORE: i64 = 1;
/// Deepest chain of resolver-to-fallback calls before scoring gives up.
pub const MAX_SCORE_DEPTH: usize = 64;

/// Custom scoring for one operation type.
pub trait ScoreResolver: Send + Sync {
    /// Scores `operation`. `fallback` scores other operations (or this one)
    /// with the table's baseline rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation cannot be scored.
    fn score(&self, operation: &Operation, fallback: &ScoreFallback<'_>) -> Result<i64, OperationError>;
}

/// Handle passed to a [`ScoreResolver`] to score through the table.
pub struct ScoreFallback<'a> {
    table: &'a ScoreTable,
    user: &'a User,
    depth: usize,
}

impl ScoreFallback<'_> {
    /// The caller whose request is being scored.
    #[must_use]
    pub fn user(&self) -> &User {
        self.user
    }

    /// Scores `operation` one level deeper.
    ///
    /// # Errors
    ///
    /// Returns `Validation` once the resolver depth exceeds
    /// [`MAX_SCORE_DEPTH`].
    pub fn score(&self, operation: &Operation) -> Result<i64, OperationError> {
        self.table.score_at(operation, self.user, self.depth + 1)
    }

    /// Table score for an operation type, ignoring resolvers.
    #[must_use]
    pub fn base_score(&self, op_type: &str) -> i64 {
        self.table.base_score(op_type)
    }
}

/// JSON shape of a score table:
/// `{"opScores": {"Count": 2, "Get*": 3}, "authScores": {"User": 10}}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreConfig {
    #[serde(default)]
    pub op_scores: BTreeMap<String, i64>,
    #[serde(default)]
    pub auth_scores: BTreeMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct ScoreTable {
    op_scores: Vec<(TypeMatcher, i64)>,
    auth_scores: BTreeMap<String, i64>,
    resolvers: HashMap<String, Arc<dyn ScoreResolver>>,
}

impl ScoreTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from its JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid type pattern.
    pub fn from_config(config: &ScoreConfig) -> anyhow::Result<Self> {
        let mut table = Self::new();
        for (pattern, score) in &config.op_scores {
            let matcher = TypeMatcher::parse(pattern).map_err(anyhow::Error::msg)?;
            table = table.with_op_score(matcher, *score);
        }
        for (auth, ceiling) in &config.auth_scores {
            table = table.with_auth_score(auth.clone(), *ceiling);
        }
        Ok(table)
    }

    #[must_use]
    pub fn with_op_score(mut self, matcher: TypeMatcher, score: i64) -> Self {
        self.op_scores.push((matcher, score));
        self
    }

    #[must_use]
    pub fn with_auth_score(mut self, auth: impl Into<String>, ceiling: i64) -> Self {
        self.auth_scores.insert(auth.into(), ceiling);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, op_type: impl Into<String>, resolver: Arc<dyn ScoreResolver>) -> Self {
        self.resolvers.insert(op_type.into(), resolver);
        self
    }

    /// Score of a whole operation tree for `user`.
    ///
    /// # Errors
    ///
    /// Returns an error raised by a resolver, or `Validation` when resolvers
    /// recurse past [`MAX_SCORE_DEPTH`].
    pub fn score(&self, operation: &Operation, user: &User) -> Result<i64, OperationError> {
        self.score_at(operation, user, 0)
    }

    fn score_at(&self, operation: &Operation, user: &User, depth: usize) -> Result<i64, OperationError> {
        if depth > MAX_SCORE_DEPTH {
            return Err(OperationError::validation(format!(
                "scoring {} exceeded the maximum resolver depth of {MAX_SCORE_DEPTH}",
                operation.op_type()
            )));
        }
        if operation.is_composite() {
            return operation.children().iter().try_fold(0_i64, |total, child| {
                Ok(total.saturating_add(self.score_at(child, user, depth)?))
            });
        }
        match self.resolvers.get(operation.op_type()) {
            Some(resolver) => resolver.score(
                operation,
                &ScoreFallback {
                    table: self,
                    user,
                    depth,
                },
            ),
            None => Ok(self.base_score(operation.op_type())),
        }
    }

    /// Most specific table entry for `op_type`, else the default score.
    #[must_use]
    pub fn base_score(&self, op_type: &str) -> i64 {
        most_specific(self.op_scores.iter().map(|(m, s)| (m, s)), op_type)
            .copied()
            .unwrap_or(DEFAULT_OPERATION_SCORE)
    }

    /// Highest ceiling granted by any of the user's auths; 0 when none is
    /// recognized.
    #[must_use]
    pub fn ceiling(&self, user: &User) -> i64 {
        user.op_auths
            .iter()
            .filter_map(|auth| self.auth_scores.get(auth))
            .max()
            .copied()
            .unwrap_or(0)
    }
}

impl fmt::Debug for ScoreTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut resolvers: Vec<_> = self.resolvers.keys().collect();
        resolvers.sort();
        f.debug_struct("ScoreTable")
            .field("op_scores", &self.op_scores)
            .field("auth_scores", &self.auth_scores)
            .field("resolvers", &resolvers)
            .finish()
    }
}
