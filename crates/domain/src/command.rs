//! Commands and their execution against the unit of work.

use std::sync::Arc;

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::admin::{
    Department, DepartmentCopy, DepartmentTree, PermissionRegistry, Role, RoleCopy, User,
};
use crate::aggregate::{Aggregate, DomainEvent};
use crate::cascade::{CascadeHandler, Renamed};
use crate::error::{DomainError, Result};
use crate::order::{DeliverRecord, Order};
use crate::repository;
use crate::unit_of_work::UnitOfWork;

/// Every command the bus accepts.
///
/// Refresh and delivery commands are idempotent: replaying them with the
/// same arguments leaves the state unchanged and raises no event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum Command {
    CreateRole {
        role_id: AggregateId,
        name: String,
        permissions: Vec<String>,
    },
    RenameRole {
        role_id: AggregateId,
        name: String,
    },
    CreateDepartment {
        department_id: AggregateId,
        name: String,
        parent_id: Option<AggregateId>,
    },
    RenameDepartment {
        department_id: AggregateId,
        name: String,
    },
    MoveDepartment {
        department_id: AggregateId,
        parent_id: Option<AggregateId>,
    },
    CreateUser {
        user_id: AggregateId,
        username: String,
    },
    AssignRole {
        user_id: AggregateId,
        role_id: AggregateId,
    },
    RevokeRole {
        user_id: AggregateId,
        role_id: AggregateId,
    },
    AssignDepartment {
        user_id: AggregateId,
        department_id: AggregateId,
    },
    RefreshUserRoleName {
        user_id: AggregateId,
        role_id: AggregateId,
        name: String,
        revision: u64,
    },
    RefreshUserDepartmentName {
        user_id: AggregateId,
        department_id: AggregateId,
        name: String,
        revision: u64,
    },
    /// Fans a department rename out to its members.
    RefreshDepartmentCopies {
        department_id: AggregateId,
        name: String,
        revision: u64,
    },
    CreateOrder {
        order_id: AggregateId,
        amount_cents: i64,
    },
    PayOrder {
        order_id: AggregateId,
    },
    ShipOrder {
        order_id: AggregateId,
    },
    CancelOrder {
        order_id: AggregateId,
        reason: String,
    },
    /// Opens the delivery record of a paid order.
    CreateDeliverRecord {
        order_id: AggregateId,
    },
}

impl Command {
    /// The command name, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateRole { .. } => "CreateRole",
            Command::RenameRole { .. } => "RenameRole",
            Command::CreateDepartment { .. } => "CreateDepartment",
            Command::RenameDepartment { .. } => "RenameDepartment",
            Command::MoveDepartment { .. } => "MoveDepartment",
            Command::CreateUser { .. } => "CreateUser",
            Command::AssignRole { .. } => "AssignRole",
            Command::RevokeRole { .. } => "RevokeRole",
            Command::AssignDepartment { .. } => "AssignDepartment",
            Command::RefreshUserRoleName { .. } => "RefreshUserRoleName",
            Command::RefreshUserDepartmentName { .. } => "RefreshUserDepartmentName",
            Command::RefreshDepartmentCopies { .. } => "RefreshDepartmentCopies",
            Command::CreateOrder { .. } => "CreateOrder",
            Command::PayOrder { .. } => "PayOrder",
            Command::ShipOrder { .. } => "ShipOrder",
            Command::CancelOrder { .. } => "CancelOrder",
            Command::CreateDeliverRecord { .. } => "CreateDeliverRecord",
        }
    }
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutcome {
    /// The aggregate the command addressed.
    pub aggregate_id: Option<AggregateId>,

    /// Types of the events the command raised, in order.
    pub events: Vec<&'static str>,

    /// Commands the bus must run next in the same unit of work.
    pub follow_ups: Vec<Command>,
}

impl CommandOutcome {
    fn raised<E: DomainEvent>(aggregate_id: AggregateId, events: &[E]) -> Self {
        Self {
            aggregate_id: Some(aggregate_id),
            events: events.iter().map(DomainEvent::event_type).collect(),
            follow_ups: Vec::new(),
        }
    }

    /// True if the command raised no event and queued no follow-up.
    pub fn is_unchanged(&self) -> bool {
        self.events.is_empty() && self.follow_ups.is_empty()
    }
}

fn require<A: Aggregate>(state: Option<&A>, id: AggregateId) -> Result<&A> {
    state.ok_or(DomainError::NotFound {
        kind: A::aggregate_type(),
        id,
    })
}

/// Fails if another document in `table` already has `value` in `field`.
async fn ensure_unique(
    uow: &mut UnitOfWork,
    table: &'static str,
    field: &str,
    value: &str,
    own_id: AggregateId,
) -> Result<()> {
    let mut pattern = serde_json::Map::new();
    pattern.insert(field.to_string(), serde_json::Value::from(value.trim()));

    let taken = uow
        .tx()
        .find(table, &serde_json::Value::Object(pattern))
        .await?
        .iter()
        .any(|doc| doc.key != own_id);
    if taken {
        return Err(DomainError::DuplicateName {
            kind: table,
            name: value.trim().to_string(),
        });
    }
    Ok(())
}

/// Executes single commands against a unit of work.
///
/// The executor decides and persists; dispatching the raised events and
/// running follow-ups is the bus's job.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    permissions: Arc<PermissionRegistry>,
    max_fanout: usize,
}

impl CommandExecutor {
    pub fn new(permissions: Arc<PermissionRegistry>, max_fanout: usize) -> Self {
        Self {
            permissions,
            max_fanout,
        }
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    pub async fn execute(&self, uow: &mut UnitOfWork, command: Command) -> Result<CommandOutcome> {
        match command {
            Command::CreateRole {
                role_id,
                name,
                permissions,
            } => {
                self.permissions.validate(&permissions)?;
                ensure_unique(uow, "Role", "name", &name, role_id).await?;
                let events = repository::execute::<Role, _>(uow, role_id, |role| {
                    Role::create(role, role_id, name, permissions)
                })
                .await?;
                Ok(CommandOutcome::raised(role_id, &events))
            }

            Command::RenameRole { role_id, name } => {
                ensure_unique(uow, "Role", "name", &name, role_id).await?;
                let events = repository::execute::<Role, _>(uow, role_id, |role| {
                    require(role, role_id)?.rename(name)
                })
                .await?;
                Ok(CommandOutcome::raised(role_id, &events))
            }

            Command::CreateDepartment {
                department_id,
                name,
                parent_id,
            } => {
                if let Some(parent_id) = parent_id {
                    repository::get::<Department>(uow, parent_id).await?;
                }
                let events = repository::execute::<Department, _>(uow, department_id, |dept| {
                    Department::create(dept, department_id, name, parent_id)
                })
                .await?;
                Ok(CommandOutcome::raised(department_id, &events))
            }

            Command::RenameDepartment {
                department_id,
                name,
            } => {
                let events = repository::execute::<Department, _>(uow, department_id, |dept| {
                    require(dept, department_id)?.rename(name)
                })
                .await?;
                Ok(CommandOutcome::raised(department_id, &events))
            }

            Command::MoveDepartment {
                department_id,
                parent_id,
            } => {
                if let Some(parent_id) = parent_id {
                    let tree = self.department_tree(uow).await?;
                    if tree.get(parent_id).is_none() {
                        return Err(DomainError::NotFound {
                            kind: "Department",
                            id: parent_id,
                        });
                    }
                    if tree.would_cycle(department_id, parent_id) {
                        return Err(DomainError::InvalidCommand(format!(
                            "department {department_id} cannot move under its own descendant {parent_id}"
                        )));
                    }
                }
                let events = repository::execute::<Department, _>(uow, department_id, |dept| {
                    require(dept, department_id)?.move_to(parent_id)
                })
                .await?;
                Ok(CommandOutcome::raised(department_id, &events))
            }

            Command::CreateUser { user_id, username } => {
                ensure_unique(uow, "User", "username", &username, user_id).await?;
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    User::create(user, user_id, username)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::AssignRole { user_id, role_id } => {
                let role = repository::get::<Role>(uow, role_id).await?;
                let copy = RoleCopy {
                    role_id,
                    name: role.name().to_string(),
                    revision: role.revision(),
                };
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    require(user, user_id)?.assign_role(copy)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::RevokeRole { user_id, role_id } => {
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    require(user, user_id)?.revoke_role(role_id)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::AssignDepartment {
                user_id,
                department_id,
            } => {
                let dept = repository::get::<Department>(uow, department_id).await?;
                let copy = DepartmentCopy {
                    department_id,
                    name: dept.name().to_string(),
                    revision: dept.revision(),
                };
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    require(user, user_id)?.assign_department(copy)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::RefreshUserRoleName {
                user_id,
                role_id,
                name,
                revision,
            } => {
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    require(user, user_id)?.refresh_role_name(role_id, &name, revision)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::RefreshUserDepartmentName {
                user_id,
                department_id,
                name,
                revision,
            } => {
                let events = repository::execute::<User, _>(uow, user_id, |user| {
                    require(user, user_id)?.refresh_department_name(department_id, &name, revision)
                })
                .await?;
                Ok(CommandOutcome::raised(user_id, &events))
            }

            Command::RefreshDepartmentCopies {
                department_id,
                name,
                revision,
            } => {
                let renamed = Renamed {
                    source: department_id,
                    name,
                    revision,
                };
                let follow_ups = CascadeHandler::department_name(self.max_fanout)
                    .commands_for(uow, &renamed)
                    .await?;
                Ok(CommandOutcome {
                    aggregate_id: Some(department_id),
                    events: Vec::new(),
                    follow_ups,
                })
            }

            Command::CreateOrder {
                order_id,
                amount_cents,
            } => {
                let events = repository::execute::<Order, _>(uow, order_id, |order| {
                    Order::create(order, order_id, amount_cents)
                })
                .await?;
                Ok(CommandOutcome::raised(order_id, &events))
            }

            Command::PayOrder { order_id } => {
                let events = repository::execute::<Order, _>(uow, order_id, |order| {
                    require(order, order_id)?.pay()
                })
                .await?;
                Ok(CommandOutcome::raised(order_id, &events))
            }

            Command::ShipOrder { order_id } => {
                let events = repository::execute::<Order, _>(uow, order_id, |order| {
                    require(order, order_id)?.ship()
                })
                .await?;
                Ok(CommandOutcome::raised(order_id, &events))
            }

            Command::CancelOrder { order_id, reason } => {
                let events = repository::execute::<Order, _>(uow, order_id, |order| {
                    require(order, order_id)?.cancel(reason)
                })
                .await?;
                Ok(CommandOutcome::raised(order_id, &events))
            }

            Command::CreateDeliverRecord { order_id } => {
                let order = repository::get::<Order>(uow, order_id).await?;
                let record_id = DeliverRecord::id_for(order_id);
                let events = repository::execute::<DeliverRecord, _>(uow, record_id, |record| {
                    DeliverRecord::create(record, &order)
                })
                .await?;
                Ok(CommandOutcome::raised(record_id, &events))
            }
        }
    }

    async fn department_tree(&self, uow: &mut UnitOfWork) -> Result<DepartmentTree> {
        let documents = uow
            .tx()
            .find(Department::aggregate_type(), &serde_json::json!({}))
            .await?;
        let departments = documents
            .iter()
            .map(|doc| doc.decode::<Department>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(DepartmentTree::build(departments))
    }
}
