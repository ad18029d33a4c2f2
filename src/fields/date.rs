use std::time::{Duration, SystemTime};

use crate::fields::converter::Converter;
use crate::scan::ParseError;

/// Converter for HTTP date fields.
///
/// Output always uses IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
/// Input additionally accepts the obsolete RFC 850 and asctime forms,
/// as required by RFC 7231 section 7.1.1.1. RFC 850 two-digit years
/// slide against the current date: a timestamp that would land more
/// than 50 years in the future is taken as the most recent past year
/// with the same last two digits (RFC 7231 appendix A).
#[derive(Debug, Clone, Copy, Default)]
pub struct DateConverter;

impl Converter for DateConverter {
    type Value = SystemTime;

    fn as_field_value(&self, value: &SystemTime) -> String {
        httpdate::fmt_http_date(*value)
    }

    fn from_field_value(&self, text: &str) -> Result<SystemTime, ParseError> {
        let trimmed = text.trim_matches([' ', '\t']);
        let parsed = httpdate::parse_http_date(trimmed)
            .map_err(|_| ParseError::new(0, format!("invalid http date: {text:?}")))?;
        match rfc850_date(trimmed) {
            Some((two_digit_year, month, day)) => {
                slide_two_digit_year(parsed, two_digit_year, month, day, SystemTime::now())
                    .ok_or_else(|| ParseError::new(0, format!("invalid http date: {text:?}")))
            }
            None => Ok(parsed),
        }
    }
}

/// The date components of an RFC 850 timestamp such as
/// `Sunday, 06-Nov-94 08:49:37 GMT`. The other two accepted forms carry
/// four digit years and return `None`.
fn rfc850_date(text: &str) -> Option<(i64, u32, u32)> {
    let rest = text.split_once(", ")?.1;
    let mut parts = rest.split(' ').next()?.split('-');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if year.len() != 2 {
        return None;
    }
    let month = match month {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some((year.parse().ok()?, month, day.parse().ok()?))
}

/// Moves a timestamp whose two-digit year was expanded with the base
/// parser's static pivot (00..=69 becomes 20xx) into the 50 year window
/// around `now`, shifting by whole days.
fn slide_two_digit_year(
    parsed: SystemTime,
    two_digit_year: i64,
    month: u32,
    day: u32,
    now: SystemTime,
) -> Option<SystemTime> {
    let pivoted =
        if two_digit_year <= 69 { 2000 + two_digit_year } else { 1900 + two_digit_year };
    let now_year = year_of(now);
    let mut target = (now_year / 100) * 100 + two_digit_year;
    if target > now_year + 50 {
        target -= 100;
    } else if target <= now_year - 50 {
        target += 100;
    }
    let shift = days_from_civil(target, month, day) - days_from_civil(pivoted, month, day);
    if shift >= 0 {
        parsed.checked_add(Duration::from_secs(shift as u64 * 86_400))
    } else {
        parsed.checked_sub(Duration::from_secs(shift.unsigned_abs() * 86_400))
    }
}

/// Gregorian year of a timestamp, read from the fixed layout of
/// IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
fn year_of(time: SystemTime) -> i64 {
    httpdate::fmt_http_date(time).get(12..16).and_then(|year| year.parse().ok()).unwrap_or(1970)
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year.rem_euclid(400);
    let month = i64::from(month);
    let day = i64::from(day);
    let day_of_year = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}
