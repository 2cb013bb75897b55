//! User directory collaborator
//!
//! The engine resolves assignment rules and escalation contacts through
//! [`UserDirectory`]. The real directory lives in the surrounding
//! platform; [`InMemoryDirectory`] backs tests and demos.

use docflow_types::UserId;
use std::collections::HashMap;

/// Lookup contract against the department user directory
pub trait UserDirectory: Send + Sync {
    /// All active users holding a role
    fn users_by_role(&self, role: &str) -> Vec<UserId>;

    /// All active users in a department
    fn users_by_department(&self, department: &str) -> Vec<UserId>;

    /// Whether a user exists and is active
    fn is_active(&self, user: &UserId) -> bool;

    /// Head of a department, if one is configured
    fn department_head(&self, department: &str) -> Option<UserId>;

    /// Direct supervisor of a user, if one is configured
    fn supervisor(&self, user: &UserId) -> Option<UserId>;
}

// ── In-memory reference implementation ───────────────────────────────

#[derive(Clone, Debug, Default)]
struct UserRecord {
    role: Option<String>,
    department: Option<String>,
    active: bool,
}

/// Directory backed by in-memory maps
#[derive(Default)]
pub struct InMemoryDirectory {
    users: HashMap<UserId, UserRecord>,
    department_heads: HashMap<String, UserId>,
    supervisors: HashMap<UserId, UserId>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active user with a role and department
    pub fn with_user(
        mut self,
        id: impl Into<String>,
        role: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        self.users.insert(
            UserId::new(id),
            UserRecord {
                role: Some(role.into()),
                department: Some(department.into()),
                active: true,
            },
        );
        self
    }

    /// Add a deactivated user
    pub fn with_inactive_user(mut self, id: impl Into<String>) -> Self {
        self.users.insert(UserId::new(id), UserRecord::default());
        self
    }

    pub fn with_department_head(
        mut self,
        department: impl Into<String>,
        head: impl Into<String>,
    ) -> Self {
        self.department_heads
            .insert(department.into(), UserId::new(head));
        self
    }

    pub fn with_supervisor(mut self, user: impl Into<String>, supervisor: impl Into<String>) -> Self {
        self.supervisors
            .insert(UserId::new(user), UserId::new(supervisor));
        self
    }
}

impl UserDirectory for InMemoryDirectory {
    fn users_by_role(&self, role: &str) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .users
            .iter()
            .filter(|(_, r)| r.active && r.role.as_deref() == Some(role))
            .map(|(id, _)| id.clone())
            .collect();
        users.sort();
        users
    }

    fn users_by_department(&self, department: &str) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .users
            .iter()
            .filter(|(_, r)| r.active && r.department.as_deref() == Some(department))
            .map(|(id, _)| id.clone())
            .collect();
        users.sort();
        users
    }

    fn is_active(&self, user: &UserId) -> bool {
        self.users.get(user).map(|r| r.active).unwrap_or(false)
    }

    fn department_head(&self, department: &str) -> Option<UserId> {
        self.department_heads.get(department).cloned()
    }

    fn supervisor(&self, user: &UserId) -> Option<UserId> {
        self.supervisors.get(user).cloned()
    }
}
