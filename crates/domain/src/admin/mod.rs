//! Back-office aggregates: roles, users, departments and the permission
//! registry.

mod department;
mod permissions;
mod role;
mod user;

pub use department::{Department, DepartmentEvent, DepartmentTree};
pub use permissions::{Permission, PermissionRegistry};
pub use role::{Role, RoleEvent};
pub use user::{DepartmentCopy, RoleCopy, User, UserEvent};
