use chrono::{NaiveTime, Timelike};

/// Packs back-to-back slots of `duration_minutes` into `[start, end)`.
/// A slot that would run past `end` is dropped, never shortened.
pub fn generate_slots(start: NaiveTime, end: NaiveTime, duration_minutes: u32) -> Vec<NaiveTime> {
    if duration_minutes == 0 || end <= start {
        return vec![];
    }

    let start_min = start.num_seconds_from_midnight() / 60;
    let end_min = end.num_seconds_from_midnight() / 60;

    (0..)
        .map(|i| start_min + i * duration_minutes)
        .take_while(|m| m + duration_minutes <= end_min)
        .filter_map(|m| NaiveTime::from_hms_opt(m / 60, m % 60, 0))
        .collect()
}
