use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub tenant_id: String,
    pub contact: String,
    pub name: String,
    pub total_bookings: i64,
    pub last_booking_at: String,
}
