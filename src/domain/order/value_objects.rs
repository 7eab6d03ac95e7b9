use serde::{Deserialize, Serialize};

// ============================================================================
// Order Value Objects
// ============================================================================

pub type OrderId = i32;
pub type UserId = i32;
pub type OptionId = i32;
pub type RecipientId = i32;

/// Delivery result reported by the caller; drives every status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    Success,
    Failure,
}

/// Order state, stored as its integer code.
///
/// Code 7 is reserved and has no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum OrderStatus {
    Accepted,
    AwaitingPrint,
    Printed,
    OutForDelivery,
    Delivered,
    DeliveryFailed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Accepted,
        OrderStatus::AwaitingPrint,
        OrderStatus::Printed,
        OrderStatus::OutForDelivery,
        OrderStatus::Delivered,
        OrderStatus::DeliveryFailed,
        OrderStatus::Cancelled,
    ];

    pub fn code(self) -> i32 {
        match self {
            OrderStatus::Accepted => 1,
            OrderStatus::AwaitingPrint => 2,
            OrderStatus::Printed => 3,
            OrderStatus::OutForDelivery => 4,
            OrderStatus::Delivered => 5,
            OrderStatus::DeliveryFailed => 6,
            OrderStatus::Cancelled => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            OrderStatus::Accepted => "Accepted",
            OrderStatus::AwaitingPrint => "AwaitingPrint",
            OrderStatus::Printed => "Printed",
            OrderStatus::OutForDelivery => "OutForDelivery",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::DeliveryFailed => "DeliveryFailed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Transition table. Terminal states map to themselves.
    pub fn next(self, outcome: DeliveryOutcome) -> OrderStatus {
        use DeliveryOutcome::{Failure, Success};
        use OrderStatus::*;

        match (self, outcome) {
            (Accepted, Success) => AwaitingPrint,
            (AwaitingPrint, Success) => Printed,
            (Printed, Success) => OutForDelivery,
            (OutForDelivery, Success) => Delivered,
            (DeliveryFailed, Success) => OutForDelivery,

            (Accepted | AwaitingPrint | Printed, Failure) => Cancelled,
            (OutForDelivery, Failure) => DeliveryFailed,
            (DeliveryFailed, Failure) => Cancelled,

            (Delivered | Cancelled, _) => self,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

impl From<OrderStatus> for i32 {
    fn from(status: OrderStatus) -> Self {
        status.code()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown order status code: {0}")]
pub struct UnknownStatusCode(pub i32);

impl TryFrom<i32> for OrderStatus {
    type Error = UnknownStatusCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        OrderStatus::from_code(code).ok_or(UnknownStatusCode(code))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use DeliveryOutcome::{Failure, Success};
    use OrderStatus::*;

    #[test]
    fn test_transition_table() {
        let table = [
            (Accepted, Success, AwaitingPrint),
            (Accepted, Failure, Cancelled),
            (AwaitingPrint, Success, Printed),
            (AwaitingPrint, Failure, Cancelled),
            (Printed, Success, OutForDelivery),
            (Printed, Failure, Cancelled),
            (OutForDelivery, Success, Delivered),
            (OutForDelivery, Failure, DeliveryFailed),
            (DeliveryFailed, Success, OutForDelivery),
            (DeliveryFailed, Failure, Cancelled),
            (Delivered, Success, Delivered),
            (Delivered, Failure, Delivered),
            (Cancelled, Success, Cancelled),
            (Cancelled, Failure, Cancelled),
        ];

        for (current, outcome, expected) in table {
            assert_eq!(current.next(outcome), expected, "{} + {:?}", current, outcome);
        }
    }

    #[test]
    fn test_terminal_states_never_change() {
        for status in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert_eq!(status.next(Success), status);
            assert_eq!(status.next(Failure), status);
        }
    }

    #[test]
    fn test_failed_delivery_then_failure_again_cancels() {
        let failed = OutForDelivery.next(Failure);
        assert_eq!(failed, DeliveryFailed);
        assert_eq!(failed.next(Failure), Cancelled);
    }

    #[test]
    fn test_no_path_jumps_from_accepted_to_delivered() {
        assert_ne!(Accepted.next(Success), Delivered);
        assert_ne!(Accepted.next(Failure), Delivered);
    }

    #[test]
    fn test_status_codes() {
        let codes: Vec<i32> = OrderStatus::ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 8]);

        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(OrderStatus::from_code(7), None);
        assert_eq!(OrderStatus::try_from(0), Err(UnknownStatusCode(0)));
    }

    #[test]
    fn test_status_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Cancelled).unwrap(), "8");
        assert_eq!(serde_json::from_str::<OrderStatus>("4").unwrap(), OutForDelivery);
        assert!(serde_json::from_str::<OrderStatus>("7").is_err());
    }
}
