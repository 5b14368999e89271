use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{DomainError, Result};

/// One grantable permission and the menu it appears under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub code: String,
    pub label: String,
    pub menu: String,
}

/// The set of permissions roles may be granted.
///
/// Built once at start-up and passed to the command executor.
#[derive(Debug, Clone, Default)]
pub struct PermissionRegistry {
    permissions: BTreeMap<String, Permission>,
}

impl PermissionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a permission.
    pub fn with(mut self, code: &str, label: &str, menu: &str) -> Self {
        self.permissions.insert(
            code.to_string(),
            Permission {
                code: code.to_string(),
                label: label.to_string(),
                menu: menu.to_string(),
            },
        );
        self
    }

    /// The permissions of the back-office screens.
    pub fn builtin() -> Self {
        Self::new()
            .with("user:read", "View users", "Users")
            .with("user:write", "Edit users", "Users")
            .with("role:read", "View roles", "Roles")
            .with("role:write", "Edit roles", "Roles")
            .with("department:read", "View departments", "Departments")
            .with("department:write", "Edit departments", "Departments")
            .with("order:read", "View orders", "Orders")
            .with("order:write", "Edit orders", "Orders")
    }

    pub fn contains(&self, code: &str) -> bool {
        self.permissions.contains_key(code)
    }

    pub fn get(&self, code: &str) -> Option<&Permission> {
        self.permissions.get(code)
    }

    /// Fails on the first code that is not registered.
    pub fn validate<'a>(&self, codes: impl IntoIterator<Item = &'a String>) -> Result<()> {
        match codes.into_iter().find(|code| !self.contains(code)) {
            Some(unknown) => Err(DomainError::UnknownPermission(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Permissions grouped by menu, both in name order.
    pub fn menus(&self) -> BTreeMap<&str, Vec<&Permission>> {
        let mut menus: BTreeMap<&str, Vec<&Permission>> = BTreeMap::new();
        for permission in self.permissions.values() {
            menus.entry(permission.menu.as_str()).or_default().push(permission);
        }
        menus
    }
}
