use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub category: String,
    pub duration_minutes: u32,
    pub price_cents: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub category: String,
    pub active: bool,
}

impl StaffMember {
    pub fn can_perform(&self, service: &Service) -> bool {
        self.active && self.tenant_id == service.tenant_id && self.category == service.category
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub active: bool,
}
