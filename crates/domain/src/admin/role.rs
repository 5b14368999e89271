use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::{DomainError, Result};

/// A named bundle of permissions.
///
/// `revision` increases with every rename. Users caching the role name
/// store the revision they copied, so stale refreshes can be told apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
    id: Option<AggregateId>,
    name: String,
    permissions: Vec<String>,
    revision: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RoleEvent {
    RoleCreated {
        role_id: AggregateId,
        name: String,
        permissions: Vec<String>,
    },
    RoleRenamed {
        role_id: AggregateId,
        old_name: String,
        name: String,
        revision: u64,
    },
}

impl DomainEvent for RoleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RoleEvent::RoleCreated { .. } => "RoleCreated",
            RoleEvent::RoleRenamed { .. } => "RoleRenamed",
        }
    }
}

impl Aggregate for Role {
    type Event = RoleEvent;

    fn aggregate_type() -> &'static str {
        "Role"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: &RoleEvent) {
        match event {
            RoleEvent::RoleCreated {
                role_id,
                name,
                permissions,
            } => {
                self.id = Some(*role_id);
                self.name = name.clone();
                self.permissions = permissions.clone();
                self.revision = 1;
            }
            RoleEvent::RoleRenamed { name, revision, .. } => {
                self.name = name.clone();
                self.revision = *revision;
            }
        }
    }
}

impl Role {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Decides a role creation.
    pub fn create(
        existing: Option<&Role>,
        role_id: AggregateId,
        name: String,
        permissions: Vec<String>,
    ) -> Result<Vec<RoleEvent>> {
        if existing.is_some() {
            return Err(DomainError::AlreadyExists {
                kind: "Role",
                id: role_id,
            });
        }
        let name = validate_name(name)?;
        Ok(vec![RoleEvent::RoleCreated {
            role_id,
            name,
            permissions,
        }])
    }

    /// Decides a rename. Renaming to the current name changes nothing.
    pub fn rename(&self, name: String) -> Result<Vec<RoleEvent>> {
        let name = validate_name(name)?;
        if name == self.name {
            return Ok(vec![]);
        }
        let role_id = self.id.ok_or(DomainError::InvalidCommand(
            "role has no id".to_string(),
        ))?;
        Ok(vec![RoleEvent::RoleRenamed {
            role_id,
            old_name: self.name.clone(),
            name,
            revision: self.revision + 1,
        }])
    }
}

pub(crate) fn validate_name(name: String) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidCommand("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}
