//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The status of a supply order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Approved ──► Packed ──► Sent ──► Delivered
///    │           │           │         │
///    └───────────┴───────────┴─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order is awaiting approval; header and item list can be edited.
    #[default]
    Pending,

    /// Order was approved by the supplying store.
    Approved,

    /// Goods were picked and packed.
    Packed,

    /// Goods left the store.
    Sent,

    /// Goods were handed over to the department (terminal state).
    Delivered,

    /// Order was cancelled (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Approved,
        OrderStatus::Packed,
        OrderStatus::Sent,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true if the header and item list can be modified in this status.
    pub fn can_modify_items(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns the next status on the forward path, if any.
    pub fn successor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Approved),
            OrderStatus::Approved => Some(OrderStatus::Packed),
            OrderStatus::Packed => Some(OrderStatus::Sent),
            OrderStatus::Sent => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    /// Returns true if the order can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if `target` is directly reachable from this status.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        if target == OrderStatus::Cancelled {
            return self.can_cancel();
        }
        self.successor() == Some(target)
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns the status name as it appears on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Packed => "PACKED",
            OrderStatus::Sent => "SENT",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::UnknownVariant {
                kind: "status",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn test_only_pending_can_modify_items() {
        assert!(OrderStatus::Pending.can_modify_items());
        assert!(!OrderStatus::Approved.can_modify_items());
        assert!(!OrderStatus::Packed.can_modify_items());
        assert!(!OrderStatus::Sent.can_modify_items());
        assert!(!OrderStatus::Delivered.can_modify_items());
        assert!(!OrderStatus::Cancelled.can_modify_items());
    }

    #[test]
    fn test_forward_path_is_strict() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Approved));
        assert!(OrderStatus::Approved.can_transition_to(OrderStatus::Packed));
        assert!(OrderStatus::Packed.can_transition_to(OrderStatus::Sent));
        assert!(OrderStatus::Sent.can_transition_to(OrderStatus::Delivered));

        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Packed));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Sent));
        assert!(!OrderStatus::Approved.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Packed.can_transition_to(OrderStatus::Approved));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
    }

    #[test]
    fn test_can_cancel_from_non_terminal_statuses() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Approved.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Packed.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Sent.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn test_nothing_leaves_a_terminal_status() {
        for target in OrderStatus::ALL {
            assert!(!OrderStatus::Delivered.can_transition_to(target));
            assert!(!OrderStatus::Cancelled.can_transition_to(target));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Approved.is_terminal());
        assert!(!OrderStatus::Packed.is_terminal());
        assert!(!OrderStatus::Sent.is_terminal());
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("approved".parse::<OrderStatus>().unwrap(), OrderStatus::Approved);
        assert_eq!("SENT".parse::<OrderStatus>().unwrap(), OrderStatus::Sent);
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_serializes_screaming_case() {
        let json = serde_json::to_string(&OrderStatus::Delivered).unwrap();
        assert_eq!(json, "\"DELIVERED\"");
        let status: OrderStatus = serde_json::from_str("\"PACKED\"").unwrap();
        assert_eq!(status, OrderStatus::Packed);
    }
}
