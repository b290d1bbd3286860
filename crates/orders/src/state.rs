//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its payment lifecycle.
///
/// State transitions:
/// ```text
/// Created ──► PaymentPending ──┬──► Paid
///    │                         └──► Failed
///    └──────────────────────────┴──► (Paid | Failed)
/// ```
///
/// `Paid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order has been constructed but payment has not been requested.
    #[default]
    Created,

    /// `OrderCreated` has been written; awaiting the payment outcome.
    PaymentPending,

    /// Payment succeeded (terminal state).
    Paid,

    /// Payment was rejected (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }

    /// Returns true if `self -> target` is an edge of the state machine.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        matches!(
            (*self, target),
            (OrderStatus::Created, OrderStatus::PaymentPending)
                | (
                    OrderStatus::Created | OrderStatus::PaymentPending,
                    OrderStatus::Paid | OrderStatus::Failed
                )
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "Created",
            OrderStatus::PaymentPending => "PaymentPending",
            OrderStatus::Paid => "Paid",
            OrderStatus::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown status name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl std::str::FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(OrderStatus::Created),
            "PaymentPending" => Ok(OrderStatus::PaymentPending),
            "Paid" => Ok(OrderStatus::Paid),
            "Failed" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderStatus; 4] = [
        OrderStatus::Created,
        OrderStatus::PaymentPending,
        OrderStatus::Paid,
        OrderStatus::Failed,
    ];

    #[test]
    fn test_default_status_is_created() {
        assert_eq!(OrderStatus::default(), OrderStatus::Created);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderStatus::Created.is_terminal());
        assert!(!OrderStatus::PaymentPending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        for from in [OrderStatus::Paid, OrderStatus::Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_allowed_edges() {
        use OrderStatus::*;
        assert!(Created.can_transition_to(PaymentPending));
        assert!(Created.can_transition_to(Paid));
        assert!(Created.can_transition_to(Failed));
        assert!(PaymentPending.can_transition_to(Paid));
        assert!(PaymentPending.can_transition_to(Failed));

        assert!(!Created.can_transition_to(Created));
        assert!(!PaymentPending.can_transition_to(Created));
        assert!(!PaymentPending.can_transition_to(PaymentPending));
    }

    #[test]
    fn test_parse_round_trips_display() {
        for status in ALL {
            assert_eq!(status.to_string().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("Shipped".parse::<OrderStatus>().is_err());
    }
}
