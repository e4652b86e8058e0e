//! Five-field cron expressions, evaluated in a named time zone.
//!
//! Supports `*`, `N`, `A-B`, `*/S`, `A-B/S` and comma lists in every
//! field. Day-of-week accepts 0-7 with both 0 and 7 meaning Sunday. When
//! day-of-month and day-of-week are both restricted a day matching either
//! one fires, as in classic cron.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use rowcast_core::error::{Result, RowcastError};

/// Give up searching for a next fire time after this many years.
const SEARCH_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpression {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(RowcastError::parse(format!(
                "cron expression '{expr}' must have 5 fields, got {}",
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, 0, 7, expr)?;
        // Fold 7 onto Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expr.trim().to_string(),
            minutes: parse_field(minute, 0, 59, expr)?,
            hours: parse_field(hour, 0, 23, expr)?,
            days_of_month: parse_field(dom, 1, 31, expr)?,
            months: parse_field(month, 1, 12, expr)?,
            days_of_week,
            dom_restricted: *dom != "*",
            dow_restricted: *dow != "*",
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First fire time strictly after `after`, in `after`'s zone. Local
    /// minutes skipped by a DST gap never fire.
    pub fn next_after(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local();
        let limit_year = start.year() + SEARCH_YEARS;

        let mut t = truncate_to_minute(start) + Duration::minutes(1);
        while t.year() <= limit_year {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = truncate_to_hour(t) + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            match tz.from_local_datetime(&t).earliest() {
                Some(fire) if fire > after => return Some(fire),
                _ => t += Duration::minutes(1),
            }
        }
        None
    }
}

impl std::fmt::Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn truncate_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t)
}

fn truncate_to_hour(t: NaiveDateTime) -> NaiveDateTime {
    truncate_to_minute(t).with_minute(0).unwrap_or(t)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn parse_field(field: &str, min: u32, max: u32, expr: &str) -> Result<u64> {
    let invalid = |detail: &str| {
        RowcastError::parse(format!("invalid cron field '{field}' in '{expr}': {detail}"))
    };
    let number = |s: &str| -> Result<u32> {
        let n: u32 = s.parse().map_err(|_| invalid("not a number"))?;
        if n < min || n > max {
            return Err(invalid(&format!("{n} outside {min}-{max}")));
        }
        Ok(n)
    };

    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (lo, hi) = (number(a)?, number(b)?);
            if lo > hi {
                return Err(invalid("descending range"));
            }
            (lo, hi)
        } else {
            let n = number(range)?;
            // `N/S` means from N to the end of the range.
            if part.contains('/') { (n, max) } else { (n, n) }
        };

        for v in (lo..=hi).step_by(step as usize) {
            mask |= 1u64 << v;
        }
    }
    Ok(mask)
}
