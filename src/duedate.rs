//! Due-date normalization.
//!
//! The extraction model is asked for ISO `YYYY-MM-DD` dates but in practice
//! produces relative phrases too ("Friday", "завтра", "in 3 days"). All of
//! them resolve against "now" in the configured UTC offset, always preferring
//! future dates. Dates in the past are dropped rather than creating
//! already-overdue tasks.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};

/// Current time shifted into the configured fixed offset
pub fn now_in_offset(utc_offset_hours: i32) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    Utc::now().with_timezone(&offset)
}

/// Normalize a raw due-date value to a date not earlier than today.
///
/// Returns `None` for empty, unparseable, or past values.
pub fn normalize_due_date(raw: &str, now: DateTime<FixedOffset>) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    let today = now.date_naive();
    let candidate = parse_iso_date(text)
        .or_else(|| parse_relative(text, today))
        .or_else(|| parse_weekday(text, today))?;

    (candidate >= today).then_some(candidate)
}

/// Midnight of `date` in the given offset, as epoch milliseconds
pub fn to_epoch_millis(date: NaiveDate, utc_offset_hours: i32) -> i64 {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight exists");
    midnight
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| midnight.and_utc().timestamp_millis())
}

fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    // Strict YYYY-MM-DD only; chrono rejects impossible dates for us
    if text.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

fn parse_relative(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.to_lowercase();

    match lowered.as_str() {
        "today" | "сегодня" => return Some(today),
        "tomorrow" | "завтра" => return today.checked_add_signed(Duration::days(1)),
        "day after tomorrow" | "послезавтра" => {
            return today.checked_add_signed(Duration::days(2))
        }
        _ => {}
    }

    // "in N days" / "через N дней"
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let days = match words.as_slice() {
        ["in", n, "day"] | ["in", n, "days"] => n.parse::<i64>().ok()?,
        ["через", n, rest] if rest.starts_with("дн") || rest.starts_with("день") => {
            n.parse::<i64>().ok()?
        }
        _ => return None,
    };

    if days < 0 {
        return None;
    }
    today.checked_add_signed(Duration::days(days))
}

fn parse_weekday(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lowered = text.to_lowercase();
    // Accept "Friday", "by Friday", "к пятнице", "до пятницы"
    let word = lowered
        .split_whitespace()
        .last()
        .unwrap_or(lowered.as_str());

    let target = weekday_from_name(word)?;

    // Strictly future occurrence: "Friday" said on a Friday means next week
    let mut ahead =
        (target.num_days_from_monday() as i64) - (today.weekday().num_days_from_monday() as i64);
    if ahead <= 0 {
        ahead += 7;
    }
    today.checked_add_signed(Duration::days(ahead))
}

fn weekday_from_name(word: &str) -> Option<Weekday> {
    let stem = word.trim_matches(|c: char| !c.is_alphabetic());
    match stem {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        s if s.starts_with("понедельник") => Some(Weekday::Mon),
        s if s.starts_with("вторник") => Some(Weekday::Tue),
        s if s.starts_with("сред") => Some(Weekday::Wed),
        s if s.starts_with("четверг") => Some(Weekday::Thu),
        s if s.starts_with("пятниц") => Some(Weekday::Fri),
        s if s.starts_with("суббот") => Some(Weekday::Sat),
        s if s.starts_with("воскресень") => Some(Weekday::Sun),
        _ => None,
    }
}
