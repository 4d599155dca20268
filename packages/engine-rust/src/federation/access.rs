use std::collections::BTreeSet;

use conductor_core::User;
use serde::{Deserialize, Serialize};

/// Access settings of a federated sub-executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedAccess {
    pub owner_id: String,
    /// Holding any one of these makes the sub-executor visible.
    #[serde(default)]
    pub auths: BTreeSet<String>,
    #[serde(default)]
    pub is_public: bool,
    /// Excluded from fan-out unless named explicitly.
    #[serde(default)]
    pub disabled_by_default: bool,
}

impl FederatedAccess {
    #[must_use]
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            auths: BTreeSet::new(),
            is_public: false,
            disabled_by_default: false,
        }
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    #[must_use]
    pub fn with_auths<I: IntoIterator<Item = S>, S: Into<String>>(mut self, auths: I) -> Self {
        self.auths.extend(auths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn disabled_by_default(mut self) -> Self {
        self.disabled_by_default = true;
        self
    }

    fn is_admin(user: &User, admin_auth: Option<&str>) -> bool {
        admin_auth.is_some_and(|auth| user.has_auth(auth))
    }

    #[must_use]
    pub fn is_visible_to(&self, user: &User, admin_auth: Option<&str>) -> bool {
        self.is_public
            || user.user_id == self.owner_id
            || user.has_any(&self.auths)
            || Self::is_admin(user, admin_auth)
    }

    #[must_use]
    pub fn can_remove(&self, user: &User, admin_auth: Option<&str>) -> bool {
        user.user_id == self.owner_id || Self::is_admin(user, admin_auth)
    }
}
