//! Wall-clock timestamps for log lines and memory-map artifacts.

use chrono::{DateTime, Local};

/// Format used by every human-readable artifact: `(MM/DD/YYYY HH:MM:SS AM/PM)`.
const FORMAT: &str = "(%m/%d/%Y %I:%M:%S %p)";

/// Render `time` in the shared artifact format.
#[must_use]
pub fn format(time: DateTime<Local>) -> String {
    time.format(FORMAT).to_string()
}

/// Render the current local time in the shared artifact format.
#[must_use]
pub fn now() -> String {
    format(Local::now())
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    #[test]
    fn renders_twelve_hour_time_with_meridiem() {
        let time = Local.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(super::format(time), "(03/07/2025 02:05:09 PM)");
    }

    #[test]
    fn midnight_renders_as_twelve_am() {
        let time = Local.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(super::format(time), "(01/01/2025 12:00:00 AM)");
    }
}
