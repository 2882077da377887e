use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::availability::hhmm;

/// A candidate start time on one date, with the staff who are free then.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilitySlot {
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub duration_minutes: u32,
    pub free: bool,
    pub eligible_staff_ids: Vec<String>,
}

/// Which staff a customer is booking with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffSelection {
    Specific(String),
    Any,
}

impl StaffSelection {
    /// "any" is used by availability queries, "auto" by booking requests.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "any" | "auto" => StaffSelection::Any,
            id => StaffSelection::Specific(id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staff_selection_parse() {
        assert_eq!(StaffSelection::parse("any"), StaffSelection::Any);
        assert_eq!(StaffSelection::parse("auto"), StaffSelection::Any);
        assert_eq!(StaffSelection::parse(""), StaffSelection::Any);
        assert_eq!(
            StaffSelection::parse("staff-1"),
            StaffSelection::Specific("staff-1".to_string())
        );
    }
}
