use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::{DomainError, Result};

/// Denormalized copy of one of the user's roles, stamped with the role
/// revision it was copied from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCopy {
    pub role_id: AggregateId,
    pub name: String,
    pub revision: u64,
}

/// Denormalized copy of the user's department.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentCopy {
    pub department_id: AggregateId,
    pub name: String,
    pub revision: u64,
}

/// A back-office user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    id: Option<AggregateId>,
    username: String,
    /// At most one copy per role, in assignment order.
    #[serde(default)]
    roles: Vec<RoleCopy>,
    department: Option<DepartmentCopy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    UserCreated {
        user_id: AggregateId,
        username: String,
    },
    UserRoleAssigned {
        user_id: AggregateId,
        role: RoleCopy,
    },
    UserRoleRevoked {
        user_id: AggregateId,
        role_id: AggregateId,
    },
    UserRoleNameRefreshed {
        user_id: AggregateId,
        role: RoleCopy,
    },
    UserDepartmentAssigned {
        user_id: AggregateId,
        department: DepartmentCopy,
    },
    UserDepartmentNameRefreshed {
        user_id: AggregateId,
        department: DepartmentCopy,
    },
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::UserCreated { .. } => "UserCreated",
            UserEvent::UserRoleAssigned { .. } => "UserRoleAssigned",
            UserEvent::UserRoleRevoked { .. } => "UserRoleRevoked",
            UserEvent::UserRoleNameRefreshed { .. } => "UserRoleNameRefreshed",
            UserEvent::UserDepartmentAssigned { .. } => "UserDepartmentAssigned",
            UserEvent::UserDepartmentNameRefreshed { .. } => "UserDepartmentNameRefreshed",
        }
    }
}

impl Aggregate for User {
    type Event = UserEvent;

    fn aggregate_type() -> &'static str {
        "User"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: &UserEvent) {
        match event {
            UserEvent::UserCreated { user_id, username } => {
                self.id = Some(*user_id);
                self.username = username.clone();
            }
            UserEvent::UserRoleAssigned { role, .. } | UserEvent::UserRoleNameRefreshed { role, .. } => {
                match self.roles.iter().position(|copy| copy.role_id == role.role_id) {
                    Some(index) => self.roles[index] = role.clone(),
                    None => self.roles.push(role.clone()),
                }
            }
            UserEvent::UserRoleRevoked { role_id, .. } => {
                self.roles.retain(|copy| copy.role_id != *role_id);
            }
            UserEvent::UserDepartmentAssigned { department, .. }
            | UserEvent::UserDepartmentNameRefreshed { department, .. } => {
                self.department = Some(department.clone());
            }
        }
    }
}

impl User {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn roles(&self) -> &[RoleCopy] {
        &self.roles
    }

    /// The user's copy of one role, if the user holds it.
    pub fn role(&self, role_id: AggregateId) -> Option<&RoleCopy> {
        self.roles.iter().find(|copy| copy.role_id == role_id)
    }

    pub fn department(&self) -> Option<&DepartmentCopy> {
        self.department.as_ref()
    }

    fn require_id(&self) -> Result<AggregateId> {
        self.id
            .ok_or(DomainError::InvalidCommand("user has no id".to_string()))
    }

    pub fn create(existing: Option<&User>, user_id: AggregateId, username: String) -> Result<Vec<UserEvent>> {
        if existing.is_some() {
            return Err(DomainError::AlreadyExists {
                kind: "User",
                id: user_id,
            });
        }
        let username = super::role::validate_name(username)?;
        Ok(vec![UserEvent::UserCreated { user_id, username }])
    }

    /// Adds a role to the user. Assigning a held role again only updates
    /// its copy, and only if the copy differs.
    pub fn assign_role(&self, role: RoleCopy) -> Result<Vec<UserEvent>> {
        if self.role(role.role_id) == Some(&role) {
            return Ok(vec![]);
        }
        Ok(vec![UserEvent::UserRoleAssigned {
            user_id: self.require_id()?,
            role,
        }])
    }

    /// Removes a role. No-op if the user does not hold it.
    pub fn revoke_role(&self, role_id: AggregateId) -> Result<Vec<UserEvent>> {
        if self.role(role_id).is_none() {
            return Ok(vec![]);
        }
        Ok(vec![UserEvent::UserRoleRevoked {
            user_id: self.require_id()?,
            role_id,
        }])
    }

    /// Refreshes the cached name of one role.
    ///
    /// Skips when the user no longer holds the role or the copy is already
    /// at `revision` or newer. Replays and out-of-order deliveries leave
    /// the copy unchanged.
    pub fn refresh_role_name(
        &self,
        role_id: AggregateId,
        name: &str,
        revision: u64,
    ) -> Result<Vec<UserEvent>> {
        match self.role(role_id) {
            Some(copy) if copy.revision < revision => {
                Ok(vec![UserEvent::UserRoleNameRefreshed {
                    user_id: self.require_id()?,
                    role: RoleCopy {
                        role_id,
                        name: name.to_string(),
                        revision,
                    },
                }])
            }
            _ => Ok(vec![]),
        }
    }

    /// Moves the user to a department, replacing any previous one.
    pub fn assign_department(&self, department: DepartmentCopy) -> Result<Vec<UserEvent>> {
        if self.department.as_ref() == Some(&department) {
            return Ok(vec![]);
        }
        Ok(vec![UserEvent::UserDepartmentAssigned {
            user_id: self.require_id()?,
            department,
        }])
    }

    /// Refreshes the cached department name, with the same skip rules as
    /// [`User::refresh_role_name`].
    pub fn refresh_department_name(
        &self,
        department_id: AggregateId,
        name: &str,
        revision: u64,
    ) -> Result<Vec<UserEvent>> {
        match &self.department {
            Some(copy) if copy.department_id == department_id && copy.revision < revision => {
                Ok(vec![UserEvent::UserDepartmentNameRefreshed {
                    user_id: self.require_id()?,
                    department: DepartmentCopy {
                        department_id,
                        name: name.to_string(),
                        revision,
                    },
                }])
            }
            _ => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_role(role_id: AggregateId) -> User {
        let mut user = User::default();
        user.apply_events(&User::create(None, AggregateId::new(), "ada".into()).unwrap());
        let events = user
            .assign_role(RoleCopy {
                role_id,
                name: "Editor".into(),
                revision: 1,
            })
            .unwrap();
        user.apply_events(&events);
        user
    }

    #[test]
    fn refresh_applies_newer_revision_once() {
        let role_id = AggregateId::new();
        let mut user = user_with_role(role_id);

        let events = user.refresh_role_name(role_id, "Senior Editor", 2).unwrap();
        assert_eq!(events.len(), 1);
        user.apply_events(&events);
        assert_eq!(user.role(role_id).unwrap().name, "Senior Editor");

        assert!(user.refresh_role_name(role_id, "Senior Editor", 2).unwrap().is_empty());
    }

    #[test]
    fn refresh_ignores_stale_revision() {
        let role_id = AggregateId::new();
        let mut user = user_with_role(role_id);
        let events = user.refresh_role_name(role_id, "Lead", 3).unwrap();
        user.apply_events(&events);

        assert!(user.refresh_role_name(role_id, "Senior Editor", 2).unwrap().is_empty());
        assert_eq!(user.role(role_id).unwrap().name, "Lead");
    }

    #[test]
    fn refresh_ignores_other_roles_and_users_without_role() {
        let user = user_with_role(AggregateId::new());
        assert!(user.refresh_role_name(AggregateId::new(), "X", 9).unwrap().is_empty());

        let mut bare = User::default();
        bare.apply_events(&User::create(None, AggregateId::new(), "bob".into()).unwrap());
        assert!(bare.refresh_role_name(AggregateId::new(), "X", 9).unwrap().is_empty());
    }

    #[test]
    fn roles_accumulate_and_refresh_independently() {
        let (editor, auditor) = (AggregateId::new(), AggregateId::new());
        let mut user = user_with_role(editor);
        let auditor_copy = RoleCopy {
            role_id: auditor,
            name: "Auditor".into(),
            revision: 4,
        };
        let events = user.assign_role(auditor_copy.clone()).unwrap();
        user.apply_events(&events);
        assert!(user.assign_role(auditor_copy).unwrap().is_empty());
        assert_eq!(user.roles().len(), 2);

        let events = user.refresh_role_name(editor, "Senior Editor", 2).unwrap();
        user.apply_events(&events);
        assert_eq!(user.role(editor).unwrap().name, "Senior Editor");
        assert_eq!(user.role(auditor).unwrap().name, "Auditor");
        assert_eq!(
            user.roles().iter().map(|r| r.role_id).collect::<Vec<_>>(),
            vec![editor, auditor]
        );
    }

    #[test]
    fn revoked_role_is_no_longer_refreshed() {
        let role_id = AggregateId::new();
        let mut user = user_with_role(role_id);

        let events = user.revoke_role(role_id).unwrap();
        assert_eq!(events.len(), 1);
        user.apply_events(&events);
        assert!(user.roles().is_empty());
        assert!(user.revoke_role(role_id).unwrap().is_empty());
        assert!(user.refresh_role_name(role_id, "Lead", 5).unwrap().is_empty());
    }

    #[test]
    fn department_copy_follows_same_rules() {
        let department_id = AggregateId::new();
        let mut user = User::default();
        user.apply_events(&User::create(None, AggregateId::new(), "ada".into()).unwrap());
        let copy = DepartmentCopy {
            department_id,
            name: "Sales".into(),
            revision: 1,
        };
        let events = user.assign_department(copy.clone()).unwrap();
        user.apply_events(&events);
        assert!(user.assign_department(copy).unwrap().is_empty());

        let events = user.refresh_department_name(department_id, "Revenue", 2).unwrap();
        user.apply_events(&events);
        assert_eq!(user.department().unwrap().name, "Revenue");
        assert!(user.refresh_department_name(department_id, "Revenue", 2).unwrap().is_empty());
    }

    #[test]
    fn serialized_user_exposes_role_ids_for_lookup() {
        let role_id = AggregateId::new();
        let user = user_with_role(role_id);
        let json = serde_json::to_value(&user).unwrap();
        assert!(outbox::document::json_contains(
            &json,
            &serde_json::json!({"roles": [{"role_id": role_id}]})
        ));
        assert!(!outbox::document::json_contains(
            &json,
            &serde_json::json!({"roles": [{"role_id": AggregateId::new()}]})
        ));
    }
}
