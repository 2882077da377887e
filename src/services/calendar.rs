use crate::models::{Booking, BookingStatus};

const ICS_STAMP: &str = "%Y%m%dT%H%M%S";

/// Single-event iCalendar file for a booking. Times are floating local
/// times of the venue.
pub fn generate_ics(booking: &Booking, service_name: &str) -> String {
    let dtstart = booking.starts_at().format(ICS_STAMP).to_string();
    let dtend = booking.ends_at().format(ICS_STAMP).to_string();
    let dtstamp = booking.created_at.format(ICS_STAMP).to_string();
    let uid = format!("{}@slotbook", booking.id);
    let summary = escape_text(service_name);
    let description = escape_text(&format!(
        "Booked for {} with staff {}",
        booking.customer_name, booking.staff_id
    ));
    let status = match booking.status {
        BookingStatus::Cancelled => "CANCELLED",
        BookingStatus::Pending => "TENTATIVE",
        BookingStatus::Confirmed | BookingStatus::NoShow => "CONFIRMED",
    };

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Slotbook//Appointments//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         DESCRIPTION:{description}\r\n\
         STATUS:{status}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}

fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}
