use uuid::Uuid;

/// Broadcast topic on which customer announcements are published
pub const CUSTOMER_TOPIC: &str = "customers";

/// Text announcing a newly registered customer
pub fn customer_announcement() -> String {
    format!("customer {}", Uuid::new_v4())
}
