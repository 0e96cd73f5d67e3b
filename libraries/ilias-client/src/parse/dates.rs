//! Dates as ILIAS displays them next to files.
//!
//! Recent dates are shown relative to the day the page is rendered
//! (`Heute, 14:05`, `Yesterday, 09:12`), older ones in the user's language
//! (`12. Mär 2024, 10:00`, `12 Mar 2024, 10:00`). Both are turned into one
//! stable form so the same upload reads the same on every day.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref RELATIVE: Regex = Regex::new(
        r"(?i)^(heute|gestern|morgen|today|yesterday|tomorrow),?\s+(\d{1,2}):(\d{2})$"
    )
    .expect("valid regex");
    static ref ABSOLUTE: Regex =
        Regex::new(r"^(\d{1,2})\.?\s+(\p{L}+)\.?\s+(\d{4}),?\s+(\d{1,2}):(\d{2})$").expect("valid regex");
}

/// Normalized form of a displayed date, `YYYY-MM-DD HH:MM`.
///
/// Relative dates are resolved against `today`. Text that is not a date
/// ILIAS would display comes back trimmed but otherwise unchanged.
pub fn normalize_date(text: &str, today: NaiveDate) -> String {
    let text = text.trim();
    parse_date(text, today).map_or_else(
        || text.to_string(),
        |date| date.format("%Y-%m-%d %H:%M").to_string(),
    )
}

fn parse_date(text: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    if let Some(caps) = RELATIVE.captures(text) {
        let offset = match caps[1].to_lowercase().as_str() {
            "gestern" | "yesterday" => -1,
            "morgen" | "tomorrow" => 1,
            _ => 0,
        };
        let day = today.checked_add_signed(Duration::days(offset))?;
        return Some(day.and_time(time(&caps[2], &caps[3])?));
    }

    let caps = ABSOLUTE.captures(text)?;
    let day = NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month(&caps[2])?, caps[1].parse().ok()?)?;
    Some(day.and_time(time(&caps[4], &caps[5])?))
}

fn time(hours: &str, minutes: &str) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hours.parse().ok()?, minutes.parse().ok()?, 0)
}

/// German and English month names and their abbreviations
fn month(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" | "jän" => 1,
        "feb" => 2,
        "mär" | "mrz" | "mar" => 3,
        "apr" => 4,
        "mai" | "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "okt" | "oct" => 10,
        "nov" => 11,
        "dez" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}
