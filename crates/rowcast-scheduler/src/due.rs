//! Due-window evaluation for scheduled records.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Local formats accepted in the Time column, tried in order.
const LOCAL_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y, %H:%M:%S",
    "%d/%m/%Y %I:%M:%S %p",
    "%d/%m/%Y %I:%M %p",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

/// Where a scheduled record stands relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    Due,
    /// Scheduled time is still ahead.
    Pending,
    /// Scheduled time is older than the window; it will never be due.
    Missed,
    /// The Time cell could not be read.
    Unparsable,
}

/// Parse a Time cell in `tz`. Strings with an explicit offset (RFC 3339)
/// keep their own offset. Local times inside a DST gap are rejected;
/// ambiguous ones resolve to the earlier instant.
pub fn parse_scheduled_time(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    LOCAL_FORMATS.iter().find_map(|fmt| {
        let naive = NaiveDateTime::parse_from_str(value, fmt).ok()?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

/// Due iff `now` is at or after `scheduled` and no more than
/// `window_minutes` past it. A window too large for a `Duration` has no
/// upper bound.
pub fn is_due(scheduled: DateTime<Utc>, now: DateTime<Utc>, window_minutes: i64) -> bool {
    if now < scheduled {
        return false;
    }
    match Duration::try_minutes(window_minutes) {
        Some(window) => now - scheduled <= window,
        None => true,
    }
}

/// Parse and classify in one step.
pub fn evaluate(raw: &str, tz: Tz, now: DateTime<Utc>, window_minutes: i64) -> DueState {
    let Some(scheduled) = parse_scheduled_time(raw, tz) else {
        return DueState::Unparsable;
    };
    if is_due(scheduled, now, window_minutes) {
        DueState::Due
    } else if now < scheduled {
        DueState::Pending
    } else {
        DueState::Missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_window_boundaries() {
        let t = utc("2026-03-01T10:00:00Z");
        let w = 60;
        assert!(is_due(t, t, w));
        assert!(is_due(t, t + Duration::minutes(w), w));
        assert!(!is_due(t, t + Duration::minutes(w + 1), w));
        assert!(!is_due(t, t - Duration::minutes(1), w));
    }

    #[test]
    fn test_zero_window() {
        let t = utc("2026-03-01T10:00:00Z");
        assert!(is_due(t, t, 0));
        assert!(!is_due(t, t + Duration::seconds(1), 0));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let t = utc("2026-03-01T10:00:00Z");
        let w = 999_999_999_999_999_999;
        assert!(is_due(t, t, w));
        assert!(is_due(t, t + Duration::days(365 * 50), w));
        assert!(!is_due(t, t - Duration::minutes(1), w));
        assert!(is_due(t, t + Duration::days(1), i64::MAX));
    }

    #[test]
    fn test_parse_local_formats_in_zone() {
        let tz: Tz = "Asia/Kolkata".parse().unwrap();
        let expected = utc("2026-03-01T04:30:00Z");
        for raw in [
            "2026-03-01 10:00",
            "2026-03-01 10:00:00",
            "2026-03-01T10:00",
            "01/03/2026 10:00",
            "01/03/2026 10:00:00",
            "01/03/2026, 10:00:00",
            "01/03/2026 10:00 AM",
            "01/03/2026 10:00:00 am",
            "01-03-2026 10:00",
        ] {
            assert_eq!(parse_scheduled_time(raw, tz), Some(expected), "format {raw}");
        }
    }

    #[test]
    fn test_parse_pm_and_offset() {
        let tz: Tz = "UTC".parse().unwrap();
        assert_eq!(
            parse_scheduled_time("01/03/2026 3:15 PM", tz),
            Some(utc("2026-03-01T15:15:00Z"))
        );
        assert_eq!(
            parse_scheduled_time("2026-03-01T10:00:00+02:00", tz),
            Some(utc("2026-03-01T08:00:00Z"))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let tz: Tz = "UTC".parse().unwrap();
        assert_eq!(parse_scheduled_time("tomorrow morning", tz), None);
        assert_eq!(parse_scheduled_time("", tz), None);
        assert_eq!(parse_scheduled_time("31/02/2026 10:00", tz), None);
    }

    #[test]
    fn test_dst_gap_is_unparsable() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        assert_eq!(parse_scheduled_time("2026-03-29 02:30", tz), None);
        // Ambiguous hour on the way back resolves to the first pass (CEST).
        assert_eq!(
            parse_scheduled_time("2026-10-25 02:30", tz),
            Some(utc("2026-10-25T00:30:00Z"))
        );
    }

    #[test]
    fn test_evaluate() {
        let tz: Tz = "UTC".parse().unwrap();
        let now = utc("2026-03-01T10:30:00Z");
        assert_eq!(evaluate("2026-03-01 10:00", tz, now, 60), DueState::Due);
        assert_eq!(evaluate("2026-03-01 11:00", tz, now, 60), DueState::Pending);
        assert_eq!(evaluate("2026-03-01 08:00", tz, now, 60), DueState::Missed);
        assert_eq!(evaluate("soon", tz, now, 60), DueState::Unparsable);
    }
}
