use std::collections::{BTreeMap, HashMap};

use conductor_core::User;
use parking_lot::RwLock;
use tracing::info;

use super::access::FederatedAccess;
use crate::error::OperationError;
use crate::service::executor::Executor;

/// Registered sub-executors grouped by their access settings.
///
/// Sub-executor ids are unique across all groups. Lookups return executors
/// in ascending id order, so fan-out and merge order are deterministic.
#[derive(Debug, Default)]
pub struct FederatedStorage {
    groups: RwLock<HashMap<FederatedAccess, BTreeMap<String, Executor>>>,
}

impl FederatedStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sub-executor under its own id.
    ///
    /// # Errors
    ///
    /// `Conflict` if a sub-executor with the same id is already registered.
    pub fn put(&self, access: FederatedAccess, executor: Executor) -> Result<(), OperationError> {
        let mut groups = self.groups.write();
        let id = executor.id().to_string();
        if groups.values().any(|group| group.contains_key(&id)) {
            return Err(OperationError::Conflict(format!(
                "an executor with id {id} is already registered"
            )));
        }
        info!(executor_id = %id, owner = %access.owner_id, public = access.is_public, "executor added");
        groups.entry(access).or_default().insert(id, executor);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.groups.read().values().any(|group| group.contains_key(id))
    }

    /// Removes a sub-executor the caller owns (or any, for the admin).
    ///
    /// # Errors
    ///
    /// `NotFound` if absent or invisible to the caller; `Unauthorised` if
    /// visible but not removable by the caller.
    pub fn remove(&self, id: &str, user: &User, admin_auth: Option<&str>) -> Result<Executor, OperationError> {
        let mut groups = self.groups.write();
        let Some(access) = groups
            .iter()
            .find(|(access, group)| group.contains_key(id) && access.is_visible_to(user, admin_auth))
            .map(|(access, _)| access.clone())
        else {
            return Err(not_found(id));
        };
        if !access.can_remove(user, admin_auth) {
            return Err(OperationError::unauthorised(format!(
                "user {} does not have permission to remove executor {id}",
                user.user_id
            )));
        }
        let group = groups.get_mut(&access).ok_or_else(|| not_found(id))?;
        let removed = group.remove(id).ok_or_else(|| not_found(id))?;
        if group.is_empty() {
            groups.remove(&access);
        }
        info!(executor_id = %id, user = %user.user_id, "executor removed");
        Ok(removed)
    }

    /// Ids of every sub-executor visible to the caller, sorted.
    #[must_use]
    pub fn ids(&self, user: &User, admin_auth: Option<&str>) -> Vec<String> {
        let groups = self.groups.read();
        let mut ids: Vec<String> = groups
            .iter()
            .filter(|(access, _)| access.is_visible_to(user, admin_auth))
            .flat_map(|(_, group)| group.keys().cloned())
            .collect();
        ids.sort();
        ids
    }

    /// Sub-executors to fan out to, in ascending id order.
    ///
    /// With `ids` absent: every visible sub-executor that is not disabled by
    /// default. With `ids` given: exactly those, disabled or not.
    ///
    /// # Errors
    ///
    /// `NotFound` naming every requested id that is absent or invisible.
    pub fn select(
        &self,
        ids: Option<&[String]>,
        user: &User,
        admin_auth: Option<&str>,
    ) -> Result<Vec<Executor>, OperationError> {
        let groups = self.groups.read();
        let visible = groups
            .iter()
            .filter(|(access, _)| access.is_visible_to(user, admin_auth));

        let mut selected: BTreeMap<&str, &Executor> = BTreeMap::new();
        match ids {
            None => {
                for (_, group) in visible.filter(|(access, _)| !access.disabled_by_default) {
                    selected.extend(group.iter().map(|(id, ex)| (id.as_str(), ex)));
                }
            }
            Some(wanted) => {
                let reachable: BTreeMap<&str, &Executor> = visible
                    .flat_map(|(_, group)| group.iter().map(|(id, ex)| (id.as_str(), ex)))
                    .collect();
                let mut missing = Vec::new();
                for id in wanted {
                    match reachable.get(id.as_str()) {
                        Some(executor) => {
                            selected.insert(id.as_str(), executor);
                        }
                        None => missing.push(id.as_str()),
                    }
                }
                if !missing.is_empty() {
                    return Err(OperationError::NotFound(format!(
                        "executors not found or not visible: {}",
                        missing.join(", ")
                    )));
                }
            }
        }
        Ok(selected.into_values().cloned().collect())
    }
}

fn not_found(id: &str) -> OperationError {
    OperationError::NotFound(format!("executor {id}"))
}
