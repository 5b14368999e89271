//! Static routing of domain events.
//!
//! Every event is dispatched to in-process handlers inside the transaction
//! that raised it. Events routed as [`Propagation::Integration`] are also
//! appended to the outbox and reach other consumers asynchronously.

/// How far an event travels beyond its own transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// In-process handlers only.
    Local,
    /// In-process handlers plus an outbox envelope, optionally expiring
    /// after `ttl_secs`.
    Integration { ttl_secs: Option<i64> },
}

/// One entry of the routing table.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub event_type: &'static str,
    pub propagation: Propagation,
}

const fn local(event_type: &'static str) -> Route {
    Route {
        event_type,
        propagation: Propagation::Local,
    }
}

const fn integration(event_type: &'static str, ttl_secs: Option<i64>) -> Route {
    Route {
        event_type,
        propagation: Propagation::Integration { ttl_secs },
    }
}

/// Undelivered department renames are archived after a day.
const DEPARTMENT_RENAME_TTL_SECS: i64 = 24 * 60 * 60;

/// The routing table.
///
/// Role renames cascade inside the renaming transaction. Department renames
/// can touch many users and reach them through the outbox.
pub const ROUTES: &[Route] = &[
    local("RoleCreated"),
    local("RoleRenamed"),
    local("UserCreated"),
    local("UserRoleAssigned"),
    local("UserRoleRevoked"),
    local("UserRoleNameRefreshed"),
    local("UserDepartmentAssigned"),
    local("UserDepartmentNameRefreshed"),
    local("DepartmentCreated"),
    integration("DepartmentRenamed", Some(DEPARTMENT_RENAME_TTL_SECS)),
    local("DepartmentMoved"),
    local("OrderCreated"),
    integration("OrderPaid", None),
    integration("OrderShipped", None),
    integration("OrderCancelled", None),
    integration("DeliverRecordCreated", None),
];

/// Returns the propagation of an event type. Unlisted types stay local.
pub fn propagation_of(event_type: &str) -> Propagation {
    ROUTES
        .iter()
        .find(|route| route.event_type == event_type)
        .map(|route| route.propagation)
        .unwrap_or(Propagation::Local)
}

/// Returns the event types that leave the process through the outbox.
pub fn integration_event_types() -> impl Iterator<Item = &'static str> {
    ROUTES
        .iter()
        .filter(|route| matches!(route.propagation, Propagation::Integration { .. }))
        .map(|route| route.event_type)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn routes_are_unique() {
        let mut seen = HashSet::new();
        for route in ROUTES {
            assert!(seen.insert(route.event_type), "{} listed twice", route.event_type);
        }
    }

    #[test]
    fn role_rename_is_local_and_department_rename_expires() {
        assert_eq!(propagation_of("RoleRenamed"), Propagation::Local);
        assert_eq!(
            propagation_of("DepartmentRenamed"),
            Propagation::Integration {
                ttl_secs: Some(86_400)
            }
        );
    }

    #[test]
    fn unknown_events_stay_local() {
        assert_eq!(propagation_of("SomethingElse"), Propagation::Local);
    }

    #[test]
    fn order_flow_events_are_published() {
        let published: HashSet<_> = integration_event_types().collect();
        for event_type in ["OrderPaid", "OrderShipped", "OrderCancelled", "DeliverRecordCreated"] {
            assert!(published.contains(event_type));
        }
        assert!(!published.contains("OrderCreated"));
    }
}
