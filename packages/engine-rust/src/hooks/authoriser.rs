//! Per-operation-type auth requirements, checked over the whole tree.

use std::collections::BTreeSet;

use async_trait::async_trait;
use conductor_core::{Operation, TypeMatcher, User};
use serde::{Deserialize, Serialize};

use crate::error::OperationError;
use crate::service::hook::{Hook, Request};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The caller must hold every listed auth.
    #[default]
    All,
    /// The caller must hold at least one listed auth.
    Any,
}

/// One requirement: operations matching `types` need `auths` under `mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRule {
    pub types: TypeMatcher,
    #[serde(default)]
    pub mode: AuthMode,
    pub auths: BTreeSet<String>,
}

impl AuthRule {
    #[must_use]
    pub fn new<I, S>(types: TypeMatcher, mode: AuthMode, auths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types,
            mode,
            auths: auths.into_iter().map(Into::into).collect(),
        }
    }

    fn permits(&self, user: &User) -> bool {
        match self.mode {
            AuthMode::All => user.has_all(&self.auths),
            AuthMode::Any => user.has_any(&self.auths),
        }
    }
}

/// Rejects the request when any operation anywhere in the tree matches a
/// rule the caller does not satisfy. Children are checked before their
/// parents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationAuthoriser {
    rules: Vec<AuthRule>,
}

impl OperationAuthoriser {
    #[must_use]
    pub fn new(rules: Vec<AuthRule>) -> Self {
        Self { rules }
    }

    #[must_use]
    pub fn rules(&self) -> &[AuthRule] {
        &self.rules
    }

    /// Checks every node of `operation` for `user`.
    ///
    /// # Errors
    ///
    /// `Unauthorised` naming the first operation type that fails a rule.
    pub fn authorise(&self, operation: &Operation, user: &User) -> Result<(), OperationError> {
        operation.try_visit_post_order(&mut |node| {
            let denied = self
                .rules
                .iter()
                .any(|rule| rule.types.matches(node.op_type()) && !rule.permits(user));
            if denied {
                return Err(OperationError::unauthorised(format!(
                    "user {} is not authorised to run operation {}",
                    user.user_id,
                    node.op_type()
                )));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Hook for OperationAuthoriser {
    fn name(&self) -> &'static str {
        "OperationAuthoriser"
    }

    async fn pre_execute(&self, request: &mut Request<'_>) -> Result<(), OperationError> {
        self.authorise(request.operation(), request.user())
    }
}
