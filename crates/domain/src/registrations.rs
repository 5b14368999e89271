//! The explicit list of in-process event handlers.

use std::sync::Arc;

use crate::bus::PropagationLimits;
use crate::cascade::CascadeHandler;
use crate::dispatcher::DomainEventDispatcher;

/// Builds the dispatcher with every synchronous cascade registered.
///
/// Department renames are not listed: they leave through the outbox and
/// reach the users from the directory consumer.
pub fn default_dispatcher(limits: PropagationLimits) -> DomainEventDispatcher {
    DomainEventDispatcher::new().with(
        "RoleRenamed",
        Arc::new(CascadeHandler::role_name(limits.max_fanout)),
    )
}
