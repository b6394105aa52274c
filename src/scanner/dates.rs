//! Tolerant parsing of the timestamps found in media tags.
//!
//! Cameras and phones write creation dates in many layouts
//! (`2023:08:31 11:22:33`, `2023-08-31T11:22:33.000000Z`, `20230831`, ...).
//! Only the digit groups matter: a four digit year followed by up to five
//! one- or two-digit groups for month, day, hour, minute and second.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::OnceLock;

fn loose_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[^0-9]*(19[0-9]{2}|20[0-9]{2})(?:[^0-9]*([0-9]{1,2}))?(?:[^0-9]*([0-9]{1,2}))?(?:[^0-9]*([0-9]{1,2}))?(?:[^0-9]*([0-9]{1,2}))?(?:[^0-9]*([0-9]{1,2}))?",
        )
        .expect("static regex is valid")
    })
}

/// Parse a loosely formatted timestamp.
///
/// Returns `None` for inputs shorter than eight characters or without a
/// leading 19xx/20xx year. Missing month and day default to 1, missing time
/// parts to 0. Out-of-range parts roll over into the next unit, so month 13
/// of 2023 is January 2024 and day 0 is the last day of the previous month.
pub fn parse_loose_date(input: &str) -> Option<NaiveDateTime> {
    if input.chars().count() < 8 {
        return None;
    }

    let caps = loose_date_regex().captures(input)?;
    let part = |i: usize, default: i64| -> i64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };

    let year = part(1, 1970);
    rolled_over(year, part(2, 1), part(3, 1), part(4, 0), part(5, 0), part(6, 0))
}

/// Build a date the way a lenient calendar does: every part may overflow.
fn rolled_over(year: i64, month: i64, day: i64, hour: i64, minute: i64, second: i64) -> Option<NaiveDateTime> {
    let months = year * 12 + (month - 1);
    let first_of_month = NaiveDate::from_ymd_opt(
        i32::try_from(months.div_euclid(12)).ok()?,
        (months.rem_euclid(12) + 1) as u32,
        1,
    )?
    .and_hms_opt(0, 0, 0)?;

    let offset = Duration::days(day - 1)
        + Duration::hours(hour)
        + Duration::minutes(minute)
        + Duration::seconds(second);
    first_of_month.checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn parts(input: &str) -> (i32, u32, u32, u32, u32, u32) {
        let d = parse_loose_date(input).unwrap_or_else(|| panic!("no date for {input:?}"));
        (d.year(), d.month0(), d.day(), d.hour(), d.minute(), d.second())
    }

    #[test]
    fn test_loose_formats() {
        assert_eq!(parts("20230831"), (2023, 7, 31, 0, 0, 0));
        assert_eq!(parts("2023-08-31"), (2023, 7, 31, 0, 0, 0));
        assert_eq!(parts("2023.08.31"), (2023, 7, 31, 0, 0, 0));
        assert_eq!(parts("2023083111"), (2023, 7, 31, 11, 0, 0));
        assert_eq!(parts("202308311122"), (2023, 7, 31, 11, 22, 0));
        assert_eq!(parts("20230831112233"), (2023, 7, 31, 11, 22, 33));
        assert_eq!(parts("2023.08/31T11:22;33"), (2023, 7, 31, 11, 22, 33));
        assert_eq!(parts("2023.1/2 3 4|5"), (2023, 0, 2, 3, 4, 5));
    }

    #[test]
    fn test_tag_and_exif_layouts() {
        assert_eq!(parts("2023-08-31T11:22:33.000000Z"), (2023, 7, 31, 11, 22, 33));
        assert_eq!(parts("2019:12:24 18:05:59"), (2019, 11, 24, 18, 5, 59));
    }

    #[test]
    fn test_no_date() {
        let missing: Option<&str> = None;
        assert_eq!(missing.and_then(parse_loose_date), None);
        assert_eq!(parse_loose_date(""), None);
        assert_eq!(parse_loose_date("2023"), None);
        assert_eq!(parse_loose_date("duj67r45yrhe65y54378"), None);
        assert_eq!(parse_loose_date("18991231"), None);
    }

    #[test]
    fn test_short_input_counts_characters_not_bytes() {
        // Seven characters, eleven bytes.
        assert_eq!(parse_loose_date("2023年8月"), None);
        assert_eq!(parts("2023年08月31日"), (2023, 7, 31, 0, 0, 0));
    }

    #[test]
    fn test_out_of_range_parts_roll_over() {
        assert_eq!(parts("2023.13.01"), (2024, 0, 1, 0, 0, 0));
        assert_eq!(parts("2023.03.00"), (2023, 1, 28, 0, 0, 0));
        assert_eq!(parts("2023.02.30"), (2023, 2, 2, 0, 0, 0));
        assert_eq!(parts("2023.12.31 24:00"), (2024, 0, 1, 0, 0, 0));
    }
}
