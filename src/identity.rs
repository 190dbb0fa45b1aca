//! Static identity store: user credentials, groups and project access.
//!
//! Read-only at runtime. Unknown names are admitted as anonymous users —
//! this is a demo-grade directory, not a real credential backend; swap it
//! out at the `IdentityStore` seam for production use.

use std::collections::HashMap;

use crate::protocol::ProjectId;

const ANONYMOUS_GROUP: &str = "anonymous";

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    group: String,
}

/// Users → group, group → accessible project ids.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    users: HashMap<String, UserEntry>,
    access: HashMap<String, Vec<ProjectId>>,
}

impl Default for IdentityStore {
    fn default() -> Self {
        let mut store = Self::empty();
        store.add_user("admin", "admin", "admin");
        store.add_user("alex", "alex", "user");
        store.add_user("ben", "ben", "user");
        store.grant("admin", &[1, 2, 3]);
        store.grant("user", &[1, 2]);
        store.grant(ANONYMOUS_GROUP, &[1]);
        store
    }
}

impl IdentityStore {
    /// An identity store with no users and no access rights.
    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
            access: HashMap::new(),
        }
    }

    pub fn add_user(&mut self, name: &str, password: &str, group: &str) {
        self.users.insert(
            name.to_string(),
            UserEntry {
                password: password.to_string(),
                group: group.to_string(),
            },
        );
    }

    pub fn grant(&mut self, group: &str, projects: &[ProjectId]) {
        self.access.insert(group.to_string(), projects.to_vec());
    }

    /// Registered names must match their password; unknown non-empty names
    /// are valid anonymous logins; empty names fail.
    pub fn authenticate(&self, name: &str, password: &str) -> bool {
        match self.users.get(name) {
            Some(entry) => entry.password == password,
            None => !name.is_empty(),
        }
    }

    /// Group of a user, `"anonymous"` for unknown names.
    pub fn group_of(&self, name: &str) -> &str {
        self.users
            .get(name)
            .map(|entry| entry.group.as_str())
            .unwrap_or(ANONYMOUS_GROUP)
    }

    /// Project ids a group may access; unknown groups get the anonymous set.
    pub fn projects_for(&self, group: &str) -> &[ProjectId] {
        self.access
            .get(group)
            .or_else(|| self.access.get(ANONYMOUS_GROUP))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Project ids a user may access.
    pub fn accessible(&self, name: &str) -> &[ProjectId] {
        self.projects_for(self.group_of(name))
    }

    pub fn is_authorized(&self, name: &str, project: ProjectId) -> bool {
        self.accessible(name).contains(&project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_user_password_checked() {
        let store = IdentityStore::default();
        assert!(store.authenticate("admin", "admin"));
        assert!(!store.authenticate("admin", ""));
        assert!(!store.authenticate("alex", "wrong"));
    }

    #[test]
    fn test_anonymous_login_allowed() {
        let store = IdentityStore::default();
        assert!(store.authenticate("foo", "anything"));
        assert!(store.authenticate("foo", ""));
    }

    #[test]
    fn test_empty_name_rejected() {
        let store = IdentityStore::default();
        assert!(!store.authenticate("", ""));
        assert!(!store.authenticate("", "password"));
    }

    #[test]
    fn test_groups() {
        let store = IdentityStore::default();
        assert_eq!(store.group_of("admin"), "admin");
        assert_eq!(store.group_of("alex"), "user");
        assert_eq!(store.group_of("stranger"), "anonymous");
    }

    #[test]
    fn test_access_rights() {
        let store = IdentityStore::default();
        assert_eq!(store.accessible("admin"), &[1, 2, 3]);
        assert_eq!(store.accessible("alex"), &[1, 2]);
        assert_eq!(store.accessible("stranger"), &[1]);
        assert!(store.is_authorized("alex", 2));
        assert!(!store.is_authorized("alex", 3));
    }

    #[test]
    fn test_unknown_group_falls_back_to_anonymous() {
        let mut store = IdentityStore::default();
        store.add_user("eve", "eve", "contractor");
        assert_eq!(store.accessible("eve"), &[1]);
    }
}
