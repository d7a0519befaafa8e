use super::STREAM_RETENTION;
use crate::library::communication::event::{Notification, StreamDescriptor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const STREAM_KEY: &str = "orders";

/// Amount charged for every demo order
pub const DEFAULT_ORDER_AMOUNT: u64 = 1000;

/// Order has been placed by a customer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderPlacedNotification {
    /// Unique identifier of the order
    pub id: String,

    /// Charged amount in the smallest currency unit
    pub amount: u64,
}

impl OrderPlacedNotification {
    /// Creates an order with a random identifier
    pub fn random(amount: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            amount,
        }
    }
}

impl Default for OrderPlacedNotification {
    fn default() -> Self {
        Self::random(DEFAULT_ORDER_AMOUNT)
    }
}

impl Notification for OrderPlacedNotification {
    fn stream() -> StreamDescriptor {
        StreamDescriptor::new(STREAM_KEY, Some(STREAM_RETENTION))
    }
}
