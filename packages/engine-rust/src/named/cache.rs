use conductor_core::User;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::detail::NamedOperationDetail;
use crate::error::OperationError;

/// In-memory store of named operations, keyed by name.
///
/// Every call takes the caller and the configured admin auth; read and write
/// access is checked against the stored detail's roles.
#[derive(Debug, Default)]
pub struct NamedOperationCache {
    entries: DashMap<String, NamedOperationDetail>,
}

impl NamedOperationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a detail. Replacing an existing entry requires `overwrite` and
    /// write access to that entry.
    ///
    /// # Errors
    ///
    /// `Conflict` if the name exists and `overwrite` is false;
    /// `Unauthorised` if the caller may not replace the existing entry.
    pub fn add(
        &self,
        detail: NamedOperationDetail,
        overwrite: bool,
        user: &User,
        admin_auth: Option<&str>,
    ) -> Result<(), OperationError> {
        match self.entries.entry(detail.operation_name.clone()) {
            Entry::Occupied(mut existing) => {
                if !overwrite {
                    return Err(OperationError::Conflict(format!(
                        "named operation {} already exists",
                        detail.operation_name
                    )));
                }
                if !existing.get().has_write_access(user, admin_auth) {
                    return Err(OperationError::unauthorised(format!(
                        "user {} does not have permission to overwrite named operation {}",
                        user.user_id, detail.operation_name
                    )));
                }
                debug!(name = %detail.operation_name, user = %user.user_id, "named operation replaced");
                existing.insert(detail);
            }
            Entry::Vacant(slot) => {
                debug!(name = %detail.operation_name, user = %user.user_id, "named operation added");
                slot.insert(detail);
            }
        }
        Ok(())
    }

    /// Looks up a detail the caller may read.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `Unauthorised` if the caller lacks read access.
    pub fn get(
        &self,
        name: &str,
        user: &User,
        admin_auth: Option<&str>,
    ) -> Result<NamedOperationDetail, OperationError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| OperationError::NotFound(format!("named operation {name}")))?;
        if !entry.has_read_access(user, admin_auth) {
            return Err(OperationError::unauthorised(format!(
                "user {} does not have permission to read named operation {name}",
                user.user_id
            )));
        }
        Ok(entry.value().clone())
    }

    /// Every detail the caller may read, sorted by name.
    #[must_use]
    pub fn get_all(&self, user: &User, admin_auth: Option<&str>) -> Vec<NamedOperationDetail> {
        let mut details: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.has_read_access(user, admin_auth))
            .map(|entry| entry.value().clone())
            .collect();
        details.sort_by(|a, b| a.operation_name.cmp(&b.operation_name));
        details
    }

    /// Removes a detail the caller may write.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent; `Unauthorised` if the caller lacks write access.
    pub fn delete(
        &self,
        name: &str,
        user: &User,
        admin_auth: Option<&str>,
    ) -> Result<(), OperationError> {
        let removed = self
            .entries
            .remove_if(name, |_, detail| detail.has_write_access(user, admin_auth));
        if removed.is_some() {
            debug!(name, user = %user.user_id, "named operation deleted");
            return Ok(());
        }
        if self.entries.contains_key(name) {
            Err(OperationError::unauthorised(format!(
                "user {} does not have permission to delete named operation {name}",
                user.user_id
            )))
        } else {
            Err(OperationError::NotFound(format!("named operation {name}")))
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    fn detail(name: &str, creator: &str) -> NamedOperationDetail {
        NamedOperationDetail::new(name, creator, r#"{"type":"Count"}"#)
    }

    #[test]
    fn add_rejects_duplicates_without_overwrite() {
        let cache = NamedOperationCache::new();
        let alice = User::new("alice");
        cache.add(detail("op", "alice"), false, &alice, None).unwrap();
        let err = cache.add(detail("op", "alice"), false, &alice, None).unwrap_err();
        assert_eq!(err.status(), Status::Conflict);
        cache.add(detail("op", "alice"), true, &alice, None).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn overwrite_requires_write_access() {
        let cache = NamedOperationCache::new();
        cache
            .add(detail("op", "alice"), false, &User::new("alice"), None)
            .unwrap();
        let bob = User::new("bob");
        let err = cache.add(detail("op", "bob"), true, &bob, None).unwrap_err();
        assert_eq!(err.status(), Status::Forbidden);
        let admin = User::new("carol").with_auths(["admin"]);
        cache.add(detail("op", "carol"), true, &admin, Some("admin")).unwrap();
        assert_eq!(
            cache.get("op", &admin, Some("admin")).unwrap().creator_id,
            "carol"
        );
    }

    #[test]
    fn get_distinguishes_missing_from_forbidden() {
        let cache = NamedOperationCache::new();
        cache
            .add(detail("op", "alice"), false, &User::new("alice"), None)
            .unwrap();
        let bob = User::new("bob");
        assert_eq!(cache.get("op", &bob, None).unwrap_err().status(), Status::Forbidden);
        assert_eq!(cache.get("nope", &bob, None).unwrap_err().status(), Status::NotFound);
    }

    #[test]
    fn get_all_filters_by_read_access() {
        let cache = NamedOperationCache::new();
        let alice = User::new("alice");
        cache.add(detail("b", "alice"), false, &alice, None).unwrap();
        cache.add(detail("a", "alice"), false, &alice, None).unwrap();
        cache
            .add(detail("c", "bob"), false, &User::new("bob"), None)
            .unwrap();
        let names: Vec<_> = cache
            .get_all(&alice, None)
            .into_iter()
            .map(|d| d.operation_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn delete_checks_write_access() {
        let cache = NamedOperationCache::new();
        let alice = User::new("alice");
        cache.add(detail("op", "alice"), false, &alice, None).unwrap();
        assert_eq!(
            cache.delete("op", &User::new("bob"), None).unwrap_err().status(),
            Status::Forbidden
        );
        cache.delete("op", &alice, None).unwrap();
        assert!(cache.is_empty());
        assert_eq!(
            cache.delete("op", &alice, None).unwrap_err().status(),
            Status::NotFound
        );
    }
}
