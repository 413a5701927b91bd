use crate::models::Booking;

const ICS_STAMP: &str = "%Y%m%dT%H%M%SZ";

/// Escape text per RFC 5545 so notes can't break the property layout.
fn escape_text(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}

pub fn generate_ics(booking: &Booking, provider_name: &str) -> String {
    let dtstart = booking.start_datetime.format(ICS_STAMP).to_string();
    let dtend = booking.end_datetime.format(ICS_STAMP).to_string();
    let dtstamp = booking.updated_at.format(ICS_STAMP).to_string();
    let uid = format!("{}@slotkeeper", booking.id);

    let summary = escape_text(&format!("{} with {}", booking.service_id, provider_name));
    let description = escape_text(booking.notes.as_deref().unwrap_or("No additional notes"));
    let status = if booking.status.holds_reservation() {
        "CONFIRMED"
    } else if booking.status.is_terminal() && booking.cancelled_at.is_some() {
        "CANCELLED"
    } else {
        "TENTATIVE"
    };

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Slotkeeper//Bookings//EN\r\n\
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
