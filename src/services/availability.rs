use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::availability::day_of_week;
use crate::models::{AvailabilitySlot, Booking, Service, StaffSelection, WeeklyAvailability};
use crate::services::slots::generate_slots;

/// How a pooled booking picks one staff member among those free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AssignmentPolicy {
    /// Lexicographically first staff id.
    #[default]
    FirstById,
    /// Staff whose latest live booking was made longest ago; never-booked
    /// staff go first. Ties fall back to staff id.
    LeastRecentlyBooked,
}

impl AssignmentPolicy {
    pub fn parse(s: &str) -> Self {
        match s {
            "least_recently_booked" => AssignmentPolicy::LeastRecentlyBooked,
            _ => AssignmentPolicy::FirstById,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentPolicy::FirstById => "first",
            AssignmentPolicy::LeastRecentlyBooked => "least_recently_booked",
        }
    }
}

pub fn pick_staff<'a>(
    candidates: &'a [String],
    policy: AssignmentPolicy,
    last_booked: &HashMap<String, NaiveDateTime>,
) -> Option<&'a String> {
    match policy {
        AssignmentPolicy::FirstById => candidates.iter().min(),
        AssignmentPolicy::LeastRecentlyBooked => candidates
            .iter()
            .min_by(|a, b| (last_booked.get(*a), a).cmp(&(last_booked.get(*b), b))),
    }
}

/// One eligible staff member with their windows for a single weekday.
#[derive(Debug, Clone)]
pub struct StaffSchedule {
    pub staff_id: String,
    pub windows: Vec<WeeklyAvailability>,
}

impl StaffSchedule {
    /// Every generated start time on `date`, each with whether this staff
    /// member is still free for the full `duration_minutes`.
    pub fn slots_on(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
        bookings: &[Booking],
    ) -> Vec<(NaiveTime, bool)> {
        let mut times: Vec<NaiveTime> = self
            .windows
            .iter()
            .filter(|w| w.staff_id == self.staff_id && w.applies_to(date))
            .flat_map(|w| generate_slots(w.start_time, w.end_time, duration_minutes))
            .collect();
        times.sort();
        times.dedup();

        let own: Vec<&Booking> = bookings
            .iter()
            .filter(|b| {
                b.staff_id == self.staff_id && b.booking_date == date && b.status.occupies_slot()
            })
            .collect();

        times
            .into_iter()
            .map(|t| {
                let start = date.and_time(t);
                let end = start + Duration::minutes(duration_minutes as i64);
                let taken = own.iter().any(|b| b.starts_at() < end && b.ends_at() > start);
                (t, !taken)
            })
            .collect()
    }
}

/// Merges per-staff slot lists into the customer-facing list for one date.
///
/// In specific mode only the chosen staff member's slots are returned, with
/// booked ones flagged `free: false`. In pooled mode each start time lists
/// every staff member free then and is offered if that list is non-empty.
pub fn merge_availability(
    date: NaiveDate,
    duration_minutes: u32,
    schedules: &[StaffSchedule],
    bookings: &[Booking],
    selection: &StaffSelection,
) -> Vec<AvailabilitySlot> {
    let mut by_time: BTreeMap<NaiveTime, Vec<String>> = BTreeMap::new();

    for schedule in schedules {
        if let StaffSelection::Specific(id) = selection {
            if &schedule.staff_id != id {
                continue;
            }
        }
        for (time, free) in schedule.slots_on(date, duration_minutes, bookings) {
            let entry = by_time.entry(time).or_default();
            if free {
                entry.push(schedule.staff_id.clone());
            }
        }
    }

    by_time
        .into_iter()
        .map(|(time, mut staff_ids)| {
            staff_ids.sort();
            staff_ids.dedup();
            AvailabilitySlot {
                time,
                duration_minutes,
                free: !staff_ids.is_empty(),
                eligible_staff_ids: staff_ids,
            }
        })
        .collect()
}

/// A consistent read of everything availability depends on for one
/// tenant, service and date.
#[derive(Debug, Clone)]
pub struct DaySnapshot {
    pub service: Service,
    pub date: NaiveDate,
    pub schedules: Vec<StaffSchedule>,
    pub bookings: Vec<Booking>,
}

impl DaySnapshot {
    pub fn load(
        conn: &Connection,
        tenant_id: &str,
        service_id: &str,
        date: NaiveDate,
    ) -> Result<Self, AppError> {
        let service = queries::get_service(conn, tenant_id, service_id)?
            .ok_or_else(|| AppError::NotFound(format!("service {service_id}")))?;
        if !service.active {
            return Err(AppError::Validation(format!(
                "service {service_id} is not currently offered"
            )));
        }

        let dow = day_of_week(date);
        let mut schedules = vec![];
        for staff in queries::get_staff_for_category(conn, tenant_id, &service.category)? {
            if !staff.can_perform(&service) {
                continue;
            }
            let windows = queries::get_weekly_availability(conn, &staff.id, dow)?;
            schedules.push(StaffSchedule {
                staff_id: staff.id,
                windows,
            });
        }

        let bookings = queries::get_live_bookings_on(conn, tenant_id, &date)?;

        Ok(Self {
            service,
            date,
            schedules,
            bookings,
        })
    }

    pub fn is_eligible(&self, staff_id: &str) -> bool {
        self.schedules.iter().any(|s| s.staff_id == staff_id)
    }

    /// Slots for `selection`, dropping any that start at or before `now`.
    pub fn slots(
        &self,
        selection: &StaffSelection,
        now: NaiveDateTime,
    ) -> Result<Vec<AvailabilitySlot>, AppError> {
        if let StaffSelection::Specific(id) = selection {
            if !self.is_eligible(id) {
                return Err(AppError::Validation(format!(
                    "staff member {id} cannot perform service {}",
                    self.service.id
                )));
            }
        }

        let mut slots = merge_availability(
            self.date,
            self.service.duration_minutes,
            &self.schedules,
            &self.bookings,
            selection,
        );
        slots.retain(|s| self.date.and_time(s.time) > now);
        Ok(slots)
    }
}

/// Read-only availability lookup backing `GET .../availability`.
pub fn get_availability(
    conn: &Connection,
    tenant_id: &str,
    service_id: &str,
    date: NaiveDate,
    selection: &StaffSelection,
    now: NaiveDateTime,
) -> Result<Vec<AvailabilitySlot>, AppError> {
    DaySnapshot::load(conn, tenant_id, service_id, date)?.slots(selection, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::availability::{format_time, parse_date, parse_time};
    use crate::test_support::{booking_at, monday_window, seed_salon, ts};

    fn monday() -> NaiveDate {
        parse_date("2030-06-17").unwrap()
    }

    fn schedule(id: &str, start: &str, end: &str) -> StaffSchedule {
        StaffSchedule {
            staff_id: id.to_string(),
            windows: vec![monday_window(id, start, end)],
        }
    }

    fn times(slots: &[AvailabilitySlot]) -> Vec<String> {
        slots.iter().map(|s| format_time(&s.time)).collect()
    }

    fn slot<'a>(slots: &'a [AvailabilitySlot], time: &str) -> &'a AvailabilitySlot {
        let t = parse_time(time).unwrap();
        slots.iter().find(|s| s.time == t).unwrap()
    }

    #[test]
    fn test_empty_booking_set_all_free() {
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "17:00")],
            &[],
            &StaffSelection::Specific("s1".to_string()),
        );
        assert_eq!(slots.len(), 8);
        assert_eq!(times(&slots)[0], "09:00");
        assert_eq!(times(&slots)[7], "16:00");
        assert!(slots.iter().all(|s| s.free && s.eligible_staff_ids == vec!["s1"]));
    }

    #[test]
    fn test_specific_mode_flags_taken_slot() {
        let bookings = vec![booking_at("b1", "s1", "2030-06-17", "10:00")];
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "17:00")],
            &bookings,
            &StaffSelection::Specific("s1".to_string()),
        );
        assert_eq!(slots.len(), 8);
        let ten = slot(&slots, "10:00");
        assert!(!ten.free);
        assert!(ten.eligible_staff_ids.is_empty());
        assert!(slot(&slots, "11:00").free);
    }

    #[test]
    fn test_overlapping_booking_blocks_neighbouring_slots() {
        // A 90 minute booking at 10:30 runs until 12:00
        let mut long = booking_at("b1", "s1", "2030-06-17", "10:30");
        long.duration_minutes = 90;
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "17:00")],
            &[long],
            &StaffSelection::Specific("s1".to_string()),
        );
        assert!(slot(&slots, "09:00").free);
        assert!(!slot(&slots, "10:00").free);
        assert!(!slot(&slots, "11:00").free);
        assert!(slot(&slots, "12:00").free);
    }

    #[test]
    fn test_disabled_or_missing_window_is_empty() {
        let mut off = schedule("s1", "09:00", "17:00");
        off.windows[0].is_available = false;
        let specific = StaffSelection::Specific("s1".to_string());
        assert!(merge_availability(monday(), 60, &[off], &[], &specific).is_empty());

        // Tuesday has no window
        let tuesday = parse_date("2030-06-18").unwrap();
        let slots = merge_availability(
            tuesday,
            60,
            &[schedule("s1", "09:00", "17:00")],
            &[],
            &specific,
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn test_pool_offers_slot_when_any_staff_free() {
        let bookings = vec![booking_at("b1", "s1", "2030-06-17", "10:00")];
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "17:00"), schedule("s2", "09:00", "17:00")],
            &bookings,
            &StaffSelection::Any,
        );
        let ten = slot(&slots, "10:00");
        assert!(ten.free);
        assert_eq!(ten.eligible_staff_ids, vec!["s2"]);
        assert_eq!(slot(&slots, "09:00").eligible_staff_ids, vec!["s1", "s2"]);
    }

    #[test]
    fn test_pool_unions_different_hours() {
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "12:00"), schedule("s2", "13:00", "15:00")],
            &[],
            &StaffSelection::Any,
        );
        assert_eq!(times(&slots), vec!["09:00", "10:00", "11:00", "13:00", "14:00"]);
        assert_eq!(slot(&slots, "13:00").eligible_staff_ids, vec!["s2"]);
    }

    #[test]
    fn test_pool_slot_taken_by_everyone_is_shown_not_free() {
        let bookings = vec![
            booking_at("b1", "s1", "2030-06-17", "10:00"),
            booking_at("b2", "s2", "2030-06-17", "10:00"),
        ];
        let slots = merge_availability(
            monday(),
            60,
            &[schedule("s1", "09:00", "17:00"), schedule("s2", "09:00", "17:00")],
            &bookings,
            &StaffSelection::Any,
        );
        let ten = slot(&slots, "10:00");
        assert!(!ten.free);
        assert!(ten.eligible_staff_ids.is_empty());
    }

    #[test]
    fn test_multiple_windows_per_day() {
        let mut split = schedule("s1", "09:00", "11:00");
        split.windows.push(monday_window("s1", "14:00", "16:00"));
        let slots = merge_availability(
            monday(),
            60,
            &[split],
            &[],
            &StaffSelection::Specific("s1".to_string()),
        );
        assert_eq!(times(&slots), vec!["09:00", "10:00", "14:00", "15:00"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let bookings = vec![booking_at("b1", "s2", "2030-06-17", "13:00")];
        let schedules = [schedule("s2", "09:00", "17:00"), schedule("s1", "08:00", "12:00")];
        let a = merge_availability(monday(), 30, &schedules, &bookings, &StaffSelection::Any);
        let b = merge_availability(monday(), 30, &schedules, &bookings, &StaffSelection::Any);
        assert_eq!(a, b);
    }

    #[test]
    fn test_pick_staff_first_by_id() {
        let ids = vec!["s2".to_string(), "s1".to_string()];
        let picked = pick_staff(&ids, AssignmentPolicy::FirstById, &HashMap::new());
        assert_eq!(picked.unwrap(), "s1");
        assert!(pick_staff(&[], AssignmentPolicy::FirstById, &HashMap::new()).is_none());
    }

    #[test]
    fn test_pick_staff_least_recently_booked() {
        let ids = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let mut last = HashMap::new();
        last.insert("s1".to_string(), ts("2030-06-10 09:00"));
        last.insert("s2".to_string(), ts("2030-06-01 09:00"));
        last.insert("s3".to_string(), ts("2030-06-12 09:00"));
        let picked = pick_staff(&ids, AssignmentPolicy::LeastRecentlyBooked, &last);
        assert_eq!(picked.unwrap(), "s2");

        // Never-booked staff win over anyone with history
        let ids = vec!["s1".to_string(), "s9".to_string()];
        let picked = pick_staff(&ids, AssignmentPolicy::LeastRecentlyBooked, &last);
        assert_eq!(picked.unwrap(), "s9");
    }

    #[test]
    fn test_get_availability_from_store() {
        let conn = db::init_db(":memory:").unwrap();
        seed_salon(&conn);
        queries::insert_booking(&conn, &booking_at("b1", "s1", "2030-06-17", "10:00")).unwrap();
        let now = ts("2030-06-01 00:00");

        let s1 = get_availability(
            &conn,
            "t1",
            "cut",
            monday(),
            &StaffSelection::Specific("s1".to_string()),
            now,
        )
        .unwrap();
        assert_eq!(s1.len(), 8);
        assert!(!slot(&s1, "10:00").free);

        let any = get_availability(&conn, "t1", "cut", monday(), &StaffSelection::Any, now).unwrap();
        // s3 is a nail technician and never appears
        assert!(any.iter().all(|s| !s.eligible_staff_ids.contains(&"s3".to_string())));
        assert_eq!(slot(&any, "10:00").eligible_staff_ids, vec!["s2"]);
    }

    #[test]
    fn test_get_availability_rejects_ineligible_staff() {
        let conn = db::init_db(":memory:").unwrap();
        seed_salon(&conn);
        let result = get_availability(
            &conn,
            "t1",
            "cut",
            monday(),
            &StaffSelection::Specific("s3".to_string()),
            ts("2030-06-01 00:00"),
        );
        assert!(matches!(result, Err(AppError::Validation(_))));

        let missing = get_availability(
            &conn,
            "t1",
            "nope",
            monday(),
            &StaffSelection::Any,
            ts("2030-06-01 00:00"),
        );
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_past_slots_are_not_offered() {
        let conn = db::init_db(":memory:").unwrap();
        seed_salon(&conn);

        let midday = get_availability(
            &conn,
            "t1",
            "cut",
            monday(),
            &StaffSelection::Any,
            ts("2030-06-17 12:00"),
        )
        .unwrap();
        assert_eq!(times(&midday), vec!["13:00", "14:00", "15:00", "16:00"]);

        let later = get_availability(
            &conn,
            "t1",
            "cut",
            monday(),
            &StaffSelection::Any,
            ts("2030-06-18 08:00"),
        )
        .unwrap();
        assert!(later.is_empty());
    }
}
