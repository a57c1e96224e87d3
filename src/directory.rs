//! Organisational lookups the engine consumes: who is acting, and who
//! should receive the next approval step.
use super::types::{Identity, Role};
use std::collections::{BTreeMap, HashSet};

pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, user_id: &str) -> Option<Identity>;
}

pub trait ApproverResolver: Send + Sync {
    /// The concrete person holding `role` for `requester`, if any.
    fn approver_for(&self, role: Role, requester: &Identity) -> Option<String>;
}

/// In-memory directory of users.
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    users: BTreeMap<String, Identity>,
    department_scoped: HashSet<Role>,
}

impl Default for StaticDirectory {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            department_scoped: HashSet::from([Role::DeptHead]),
        }
    }
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, identity: Identity) -> Self {
        self.users.insert(identity.id.clone(), identity);
        self
    }

    pub fn with_department_scoped(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.department_scoped = roles.into_iter().collect();
        self
    }
}

impl IdentityResolver for StaticDirectory {
    fn resolve(&self, user_id: &str) -> Option<Identity> {
        self.users.get(user_id).cloned()
    }
}

impl ApproverResolver for StaticDirectory {
    fn approver_for(&self, role: Role, requester: &Identity) -> Option<String> {
        let scoped = self.department_scoped.contains(&role);
        self.users
            .values()
            .filter(|user| user.role == role && user.id != requester.id)
            .find(|user| !scoped || user.department == requester.department)
            .map(|user| user.id.clone())
    }
}
