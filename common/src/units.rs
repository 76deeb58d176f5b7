// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// The unit in which a period or a tolerance is expressed.
///
/// Seconds up to weeks have a fixed length. Months and years follow the
/// UTC calendar when bucketing, and are approximated (30 and 365 days)
/// when used as a duration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

pub const SECOND_MS: i64 = 1000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;
const MONTH_APPROX_MS: i64 = 30 * DAY_MS;
const YEAR_APPROX_MS: i64 = 365 * DAY_MS;

/// A day starts at 02:00 UTC.
pub const DAY_OFFSET_MS: i64 = 2 * HOUR_MS;
/// A week starts on Monday at 02:00 UTC (the epoch was a Thursday).
pub const WEEK_OFFSET_MS: i64 = 4 * DAY_MS + DAY_OFFSET_MS;

impl TimeUnit {
    pub const ALL: [TimeUnit; 7] = [
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
        TimeUnit::Month,
        TimeUnit::Year,
    ];

    /// Length of one unit in milliseconds, for the units that have one.
    pub fn fixed_period_ms(self) -> Option<i64> {
        match self {
            TimeUnit::Second => Some(SECOND_MS),
            TimeUnit::Minute => Some(MINUTE_MS),
            TimeUnit::Hour => Some(HOUR_MS),
            TimeUnit::Day => Some(DAY_MS),
            TimeUnit::Week => Some(WEEK_MS),
            TimeUnit::Month | TimeUnit::Year => None,
        }
    }

    fn offset_ms(self) -> i64 {
        match self {
            TimeUnit::Day => DAY_OFFSET_MS,
            TimeUnit::Week => WEEK_OFFSET_MS,
            _ => 0,
        }
    }

    fn approx_ms(self) -> i64 {
        match self {
            TimeUnit::Month => MONTH_APPROX_MS,
            TimeUnit::Year => YEAR_APPROX_MS,
            fixed => fixed.fixed_period_ms().unwrap_or(DAY_MS),
        }
    }

    fn singular(self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }

    /// The next larger unit used when a relative label gets too large.
    fn coarser(self) -> Option<(TimeUnit, i64)> {
        match self {
            TimeUnit::Second => Some((TimeUnit::Minute, 60)),
            TimeUnit::Minute => Some((TimeUnit::Hour, 60)),
            TimeUnit::Hour => Some((TimeUnit::Day, 24)),
            TimeUnit::Day => Some((TimeUnit::Week, 7)),
            TimeUnit::Week => Some((TimeUnit::Month, 4)),
            TimeUnit::Month => Some((TimeUnit::Year, 12)),
            TimeUnit::Year => None,
        }
    }
}

fn from_millis_clamped(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(if ms < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Returns the index of the bucket of `unit` containing `time`.
pub fn to_bucket(time: DateTime<Utc>, unit: TimeUnit) -> i64 {
    let ms = time.timestamp_millis();
    match unit {
        TimeUnit::Month | TimeUnit::Year => {
            let shifted = from_millis_clamped(ms.saturating_sub(DAY_OFFSET_MS));
            let year = i64::from(shifted.year());
            if unit == TimeUnit::Year {
                year
            } else {
                year * 12 + i64::from(shifted.month0())
            }
        }
        fixed => {
            let period = fixed.fixed_period_ms().unwrap_or(DAY_MS);
            ms.saturating_sub(fixed.offset_ms()).div_euclid(period)
        }
    }
}

/// Returns the instant at which bucket `bucket` of `unit` starts.
pub fn from_bucket(bucket: i64, unit: TimeUnit) -> DateTime<Utc> {
    match unit {
        TimeUnit::Month | TimeUnit::Year => {
            let (year, month0) = if unit == TimeUnit::Year {
                (bucket, 0)
            } else {
                (bucket.div_euclid(12), bucket.rem_euclid(12))
            };
            let year = i32::try_from(year).unwrap_or(if year < 0 { i32::MIN } else { i32::MAX });
            // month0 is in 0..12, so the cast is lossless.
            match NaiveDate::from_ymd_opt(year, month0 as u32 + 1, 1) {
                Some(date) => from_millis_clamped(
                    date.and_time(chrono::NaiveTime::MIN)
                        .and_utc()
                        .timestamp_millis()
                        .saturating_add(DAY_OFFSET_MS),
                ),
                None if year < 0 => DateTime::<Utc>::MIN_UTC,
                None => DateTime::<Utc>::MAX_UTC,
            }
        }
        fixed => {
            let period = fixed.fixed_period_ms().unwrap_or(DAY_MS);
            from_millis_clamped(bucket.saturating_mul(period).saturating_add(fixed.offset_ms()))
        }
    }
}

/// Converts `magnitude` units into a duration. Months count 30 days and
/// years 365 days.
pub fn duration_of(magnitude: u32, unit: TimeUnit) -> TimeDelta {
    let ms = i64::from(magnitude).saturating_mul(unit.approx_ms());
    TimeDelta::try_milliseconds(ms).unwrap_or(TimeDelta::MAX)
}

/// Adds `magnitude` units to `time`, saturating at the end of time.
pub fn add_duration(time: DateTime<Utc>, magnitude: u32, unit: TimeUnit) -> DateTime<Utc> {
    time.checked_add_signed(duration_of(magnitude, unit))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Subtracts `magnitude` units from `time`, saturating at the start of time.
pub fn sub_duration(time: DateTime<Utc>, magnitude: u32, unit: TimeUnit) -> DateTime<Utc> {
    time.checked_sub_signed(duration_of(magnitude, unit))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// "1 day", "3 weeks".
pub fn describe_duration(magnitude: u32, unit: TimeUnit) -> String {
    if magnitude == 1 {
        format!("1 {}", unit.singular())
    } else {
        format!("{} {}s", magnitude, unit.singular())
    }
}

// Rounds half up, so -3.5 becomes -3.
fn round_half_up(value: i64, divisor: i64) -> i64 {
    (value as f64 / divisor as f64 + 0.5).floor() as i64
}

/// Describes a bucket difference relative to now ("yesterday", "in 3 days").
/// Switches to the next larger unit once the rounded value in it reaches 2.
pub fn describe_relative(delta: i64, unit: TimeUnit) -> String {
    if let Some((coarser, factor)) = unit.coarser() {
        let rounded = round_half_up(delta, factor);
        if rounded.abs() >= 2 {
            return describe_relative(rounded, coarser);
        }
    }

    let (previous, current, next) = match unit {
        TimeUnit::Year => ("last year", "this year", "next year"),
        TimeUnit::Month => ("last month", "this month", "next month"),
        TimeUnit::Week => ("last week", "this week", "next week"),
        TimeUnit::Day => ("yesterday", "today", "tomorrow"),
        TimeUnit::Hour => ("an hour ago", "this hour", "in an hour"),
        TimeUnit::Minute => ("a minute ago", "now", "in a minute"),
        TimeUnit::Second => ("a second ago", "immediately", "in a second"),
    };

    match delta {
        -1 => previous.to_string(),
        0 => current.to_string(),
        1 => next.to_string(),
        d if d < 0 => format!("{} {}s ago", -d, unit.singular()),
        d => format!("in {} {}s", d, unit.singular()),
    }
}

/// Labels the bucket of `unit` that contains `time`.
pub fn describe_time(time: DateTime<Utc>, unit: TimeUnit) -> String {
    let start = from_bucket(to_bucket(time, unit), unit);
    match unit {
        TimeUnit::Year => format!("in {}", start.format("%Y")),
        TimeUnit::Month => format!("in {}", start.format("%B %Y")),
        TimeUnit::Week => format!("the week of {}", start.format("%A %-d %B %Y")),
        TimeUnit::Day => format!("on {}", start.format("%A %-d %B %Y")),
        TimeUnit::Hour | TimeUnit::Minute | TimeUnit::Second => {
            format!("on {}", start.format("%A %-d %B %Y at %H:%M"))
        }
    }
}
