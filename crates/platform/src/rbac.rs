//! Role-Based Access Control: a static role → permission table with flat
//! set-containment checks.

use dynamis_core::{DynamisError, DynamisResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Fixed set of user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Manager,
    TeamMember,
}

impl Role {
    /// All role variants.
    pub fn all() -> [Role; 4] {
        [Role::Owner, Role::Admin, Role::Manager, Role::TeamMember]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::TeamMember => "team_member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DynamisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "team_member" => Ok(Role::TeamMember),
            other => Err(DynamisError::config(format!("unknown role: {other}"))),
        }
    }
}

const OWNER_PERMISSIONS: &[&str] = &[
    "manage_users",
    "manage_roles",
    "manage_billing",
    "manage_settings",
    "view_analytics",
    "manage_projects",
    "manage_teams",
    "manage_integrations",
    "manage_security",
    "manage_compliance",
    "view_audit_logs",
    "manage_api_keys",
    "manage_encryption_keys",
    "manage_backups",
    "manage_infrastructure",
];

const ADMIN_PERMISSIONS: &[&str] = &[
    "manage_users",
    "manage_roles",
    "manage_settings",
    "view_analytics",
    "manage_projects",
    "manage_teams",
    "manage_integrations",
    "view_audit_logs",
    "manage_api_keys",
];

const MANAGER_PERMISSIONS: &[&str] = &[
    "manage_projects",
    "manage_teams",
    "view_analytics",
    "view_audit_logs",
];

const TEAM_MEMBER_PERMISSIONS: &[&str] = &["view_projects", "view_teams", "view_analytics"];

/// Immutable mapping from role to its permission set.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    roles: HashMap<Role, BTreeSet<String>>,
}

impl Default for PermissionTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PermissionTable {
    /// The built-in table for the four system roles.
    pub fn standard() -> Self {
        Self::from_entries([
            (Role::Owner, OWNER_PERMISSIONS),
            (Role::Admin, ADMIN_PERMISSIONS),
            (Role::Manager, MANAGER_PERMISSIONS),
            (Role::TeamMember, TEAM_MEMBER_PERMISSIONS),
        ])
    }

    /// Build a table from explicit entries. Roles left out are treated as
    /// unconfigured and rejected by [`PermissionTable::has_permission`].
    pub fn from_entries<I, P, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Role, P)>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let roles = entries
            .into_iter()
            .map(|(role, perms)| {
                let set = perms.into_iter().map(|p| p.as_ref().to_string()).collect();
                (role, set)
            })
            .collect();
        Self { roles }
    }

    /// Whether `role` holds every permission in `required`.
    ///
    /// Unknown role names and roles missing from this table are
    /// configuration errors rather than a denial.
    pub fn has_permission<S: AsRef<str>>(
        &self,
        role: &str,
        required: &[S],
    ) -> DynamisResult<bool> {
        let role: Role = role.parse()?;
        let granted = self.permissions_for(role)?;
        Ok(required.iter().all(|p| granted.contains(p.as_ref())))
    }

    /// Typed variant of [`PermissionTable::has_permission`].
    pub fn permits<S: AsRef<str>>(&self, role: Role, required: &[S]) -> DynamisResult<bool> {
        let granted = self.permissions_for(role)?;
        Ok(required.iter().all(|p| granted.contains(p.as_ref())))
    }

    pub fn permissions_for(&self, role: Role) -> DynamisResult<&BTreeSet<String>> {
        self.roles.get(&role).ok_or_else(|| {
            DynamisError::config(format!("role `{role}` has no permission set configured"))
        })
    }

    /// Roles configured in this table, in declaration order of [`Role`].
    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.keys().copied().collect();
        roles.sort();
        roles
    }
}
