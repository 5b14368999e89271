//! Cascades that refresh denormalized copies after a source entity changes.
//!
//! A cascade resolves the ids affected by a change and turns each one into
//! an update command. The update commands compare revisions before writing,
//! so running a cascade twice leaves the same state as running it once.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use serde_json::json;

use crate::admin::{DepartmentEvent, RoleEvent};
use crate::command::Command;
use crate::dispatcher::EventHandler;
use crate::error::{DomainError, Result};
use crate::unit_of_work::{RaisedEvent, UnitOfWork};

/// Finds the entities holding a copy of the changed entity.
#[async_trait]
pub trait ResolveAffected: Send + Sync {
    async fn resolve(&self, uow: &mut UnitOfWork, changed: AggregateId) -> Result<Vec<AggregateId>>;
}

/// Users holding a copy of the changed role.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersWithRole;

#[async_trait]
impl ResolveAffected for UsersWithRole {
    async fn resolve(&self, uow: &mut UnitOfWork, changed: AggregateId) -> Result<Vec<AggregateId>> {
        users_matching(uow, json!({ "roles": [{ "role_id": changed }] })).await
    }
}

/// Users whose department copy points at the changed department.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersInDepartment;

#[async_trait]
impl ResolveAffected for UsersInDepartment {
    async fn resolve(&self, uow: &mut UnitOfWork, changed: AggregateId) -> Result<Vec<AggregateId>> {
        users_matching(uow, json!({ "department": { "department_id": changed } })).await
    }
}

async fn users_matching(uow: &mut UnitOfWork, pattern: serde_json::Value) -> Result<Vec<AggregateId>> {
    let mut ids: Vec<AggregateId> = uow
        .tx()
        .find("User", &pattern)
        .await?
        .into_iter()
        .map(|doc| doc.key)
        .collect();
    ids.sort();
    Ok(ids)
}

/// Resolves the affected ids and enforces the fan-out limit.
pub async fn fan_out(
    uow: &mut UnitOfWork,
    resolver: &dyn ResolveAffected,
    changed: AggregateId,
    cascade: &'static str,
    max_fanout: usize,
) -> Result<Vec<AggregateId>> {
    let affected = resolver.resolve(uow, changed).await?;
    metrics::histogram!("cascade_fanout", "cascade" => cascade).record(affected.len() as f64);

    if affected.len() > max_fanout {
        tracing::warn!(
            cascade,
            changed = %changed,
            affected = affected.len(),
            limit = max_fanout,
            "cascade fan-out over limit"
        );
        return Err(DomainError::FanoutExceeded {
            cascade,
            affected: affected.len(),
            limit: max_fanout,
        });
    }

    tracing::debug!(cascade, changed = %changed, affected = affected.len(), "cascade resolved");
    Ok(affected)
}

/// A rename of a source entity, as seen by a cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub source: AggregateId,
    pub name: String,
    pub revision: u64,
}

type Extract = fn(&RaisedEvent) -> Result<Option<Renamed>>;
type Refresh = fn(AggregateId, &Renamed) -> Command;

/// Turns a rename into one refresh command per affected entity.
pub struct CascadeHandler {
    name: &'static str,
    extract: Extract,
    resolver: Arc<dyn ResolveAffected>,
    refresh: Refresh,
    max_fanout: usize,
}

impl CascadeHandler {
    /// `RoleRenamed` refreshes the role copy of every user holding the role.
    pub fn role_name(max_fanout: usize) -> Self {
        Self {
            name: "role-name",
            extract: |event| {
                Ok(match event.decode::<RoleEvent>()? {
                    RoleEvent::RoleRenamed {
                        role_id,
                        name,
                        revision,
                        ..
                    } => Some(Renamed {
                        source: role_id,
                        name,
                        revision,
                    }),
                    _ => None,
                })
            },
            resolver: Arc::new(UsersWithRole),
            refresh: |user_id, renamed| Command::RefreshUserRoleName {
                user_id,
                role_id: renamed.source,
                name: renamed.name.clone(),
                revision: renamed.revision,
            },
            max_fanout,
        }
    }

    /// `DepartmentRenamed` refreshes the department copy of every member.
    ///
    /// Runs from the directory consumer, not inside the renaming
    /// transaction.
    pub fn department_name(max_fanout: usize) -> Self {
        Self {
            name: "department-name",
            extract: |event| {
                Ok(match event.decode::<DepartmentEvent>()? {
                    DepartmentEvent::DepartmentRenamed {
                        department_id,
                        name,
                        revision,
                        ..
                    } => Some(Renamed {
                        source: department_id,
                        name,
                        revision,
                    }),
                    _ => None,
                })
            },
            resolver: Arc::new(UsersInDepartment),
            refresh: |user_id, renamed| Command::RefreshUserDepartmentName {
                user_id,
                department_id: renamed.source,
                name: renamed.name.clone(),
                revision: renamed.revision,
            },
            max_fanout,
        }
    }

    /// Resolves the affected entities and builds their refresh commands.
    pub async fn commands_for(&self, uow: &mut UnitOfWork, renamed: &Renamed) -> Result<Vec<Command>> {
        let affected = fan_out(
            uow,
            self.resolver.as_ref(),
            renamed.source,
            self.name,
            self.max_fanout,
        )
        .await?;
        Ok(affected
            .into_iter()
            .map(|id| (self.refresh)(id, renamed))
            .collect())
    }
}

#[async_trait]
impl EventHandler for CascadeHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, uow: &mut UnitOfWork, event: &RaisedEvent) -> Result<Vec<Command>> {
        match (self.extract)(event)? {
            Some(renamed) => self.commands_for(uow, &renamed).await,
            None => Ok(vec![]),
        }
    }
}
