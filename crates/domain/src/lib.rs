//! Domain layer of the propagation engine.
//!
//! This crate provides:
//! - State-stored aggregates for the back-office (roles, users,
//!   departments) and for orders and their delivery records
//! - The command bus, which runs a command, dispatches the events it raises
//!   and executes cascade commands in the same unit of work
//! - The routing table deciding which events also leave through the outbox
//! - Cascade handlers that keep denormalized copies in sync

pub mod admin;
pub mod aggregate;
pub mod bus;
pub mod cascade;
pub mod command;
pub mod dispatcher;
pub mod error;
pub mod order;
pub mod registrations;
pub mod repository;
pub mod routing;
pub mod unit_of_work;

pub use admin::{
    Department, DepartmentCopy, DepartmentEvent, DepartmentTree, Permission, PermissionRegistry,
    Role, RoleCopy, RoleEvent, User, UserEvent,
};
pub use aggregate::{Aggregate, DomainEvent};
pub use bus::{CommandBus, PropagationLimits};
pub use cascade::{CascadeHandler, Renamed, ResolveAffected, UsersInDepartment, UsersWithRole};
pub use command::{Command, CommandExecutor, CommandOutcome};
pub use dispatcher::{DomainEventDispatcher, EventHandler};
pub use error::{DomainError, Result};
pub use order::{DeliverRecord, DeliverRecordEvent, Order, OrderEvent, OrderState};
pub use routing::{Propagation, propagation_of};
pub use unit_of_work::{Committed, RaisedEvent, UnitOfWork};
