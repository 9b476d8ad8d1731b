use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

use crate::expr::operand::Operand;

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// `parseDate(v)`: dates, date-like text, or epoch milliseconds.
pub fn parse_date(value: &Operand) -> Option<NaiveDateTime> {
    match value {
        Operand::Date(date) => Some(*date),
        Operand::Number(millis) if millis.is_finite() => {
            DateTime::from_timestamp_millis(*millis as i64).map(|date| date.naive_utc())
        }
        Operand::Text(text) => parse_date_text(text.trim()),
        _ => None,
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.naive_utc());
    }
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// `age(v)`: whole calendar years between the date and `today`.
pub fn age(value: &Operand, today: NaiveDate) -> Option<i64> {
    let born = parse_date(value)?.date();
    let mut years = i64::from(today.year() - born.year());
    if (today.month(), today.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    Some(years)
}

/// `diffDays(a, b)`: whole days of `a - b`, rounded.
pub fn diff_days(a: &Operand, b: &Operand) -> Option<i64> {
    let left = parse_date(a)?;
    let right = parse_date(b)?;
    let millis = (left - right).num_milliseconds() as f64;
    Some((millis / MILLIS_PER_DAY).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Operand {
        Operand::Text(value.to_string())
    }

    fn day(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    #[test]
    fn parses_common_shapes() {
        assert!(parse_date(&text("2020-02-29")).is_some());
        assert!(parse_date(&text("2020-02-29T10:15")).is_some());
        assert!(parse_date(&text("2020-02-29T10:15:00Z")).is_some());
        assert!(parse_date(&text("not a date")).is_none());
        assert!(parse_date(&Operand::Null).is_none());
    }

    #[test]
    fn age_waits_for_birthday() {
        let today = day(2024, 6, 15);
        assert_eq!(age(&text("2000-06-15"), today), Some(24));
        assert_eq!(age(&text("2000-06-16"), today), Some(23));
        assert_eq!(age(&text(""), today), None);
    }

    #[test]
    fn diff_days_is_signed() {
        assert_eq!(diff_days(&text("2024-03-01"), &text("2024-02-01")), Some(29));
        assert_eq!(diff_days(&text("2024-02-01"), &text("2024-03-01")), Some(-29));
        assert_eq!(diff_days(&text("2024-02-01"), &Operand::Undefined), None);
    }
}
