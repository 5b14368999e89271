//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► Paid ──► Shipped
///    │         │
///    └─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Order has been placed, awaiting payment.
    #[default]
    Created,

    /// Payment confirmed, awaiting shipment.
    Paid,

    /// Order has left the warehouse (terminal state).
    Shipped,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderState {
    /// Returns true if the order can be paid in this state.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderState::Created)
    }

    /// Returns true if the order can be shipped in this state.
    pub fn can_ship(&self) -> bool {
        matches!(self, OrderState::Paid)
    }

    /// Returns true if a delivery record may be opened for the order.
    pub fn can_open_delivery(&self) -> bool {
        matches!(self, OrderState::Paid | OrderState::Shipped)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderState::Created | OrderState::Paid)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Shipped | OrderState::Cancelled)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "Created",
            OrderState::Paid => "Paid",
            OrderState::Shipped => "Shipped",
            OrderState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_created() {
        assert_eq!(OrderState::default(), OrderState::Created);
    }

    #[test]
    fn transitions() {
        assert!(OrderState::Created.can_pay());
        assert!(!OrderState::Paid.can_pay());
        assert!(OrderState::Paid.can_ship());
        assert!(!OrderState::Created.can_ship());
        assert!(!OrderState::Cancelled.can_ship());
        assert!(OrderState::Paid.can_cancel());
        assert!(!OrderState::Shipped.can_cancel());
    }

    #[test]
    fn terminal_states() {
        assert!(!OrderState::Created.is_terminal());
        assert!(!OrderState::Paid.is_terminal());
        assert!(OrderState::Shipped.is_terminal());
        assert!(OrderState::Cancelled.is_terminal());
    }
}
