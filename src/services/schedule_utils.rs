use chrono::{
    DateTime, Duration, FixedOffset, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;
use serde_json::json;

use crate::error::{ScheduleError, ScheduleResult};

pub fn parse_datetime(value: &str) -> ScheduleResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            ScheduleError::validation_with_details(
                "无效的时间格式",
                json!({"value": value, "error": err.to_string()}),
            )
        })
}

pub fn parse_optional_datetime(value: Option<&String>) -> ScheduleResult<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => Ok(Some(parse_datetime(raw)?)),
        None => Ok(None),
    }
}

pub fn parse_date(value: &str) -> ScheduleResult<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|err| {
        ScheduleError::validation_with_details(
            "无效的日期格式",
            json!({"value": value, "error": err.to_string()}),
        )
    })
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub fn add_minutes(dt: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    dt + Duration::minutes(minutes)
}

pub fn add_days(dt: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    dt + Duration::days(days)
}

pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    end.signed_duration_since(start).num_minutes()
}

/// Round `minutes` up to the next multiple of `increment`.
pub fn round_up_to_increment(minutes: i64, increment: i64) -> i64 {
    if increment <= 0 {
        return minutes;
    }
    ((minutes + increment - 1) / increment) * increment
}

pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// The user's local frame: a named tz database zone when the client sent
/// one, otherwise a fixed offset, otherwise UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl LocalZone {
    pub fn resolve(timezone: Option<&str>, offset_minutes: Option<i32>) -> ScheduleResult<Self> {
        if let Some(name) = timezone {
            let tz: Tz = name.parse().map_err(|_| {
                ScheduleError::validation_with_details("未知的时区名称", json!({"timezone": name}))
            })?;
            return Ok(LocalZone::Named(tz));
        }
        if let Some(minutes) = offset_minutes {
            let offset = FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                ScheduleError::validation_with_details(
                    "无效的时区偏移",
                    json!({"offsetMinutes": minutes}),
                )
            })?;
            return Ok(LocalZone::Fixed(offset));
        }
        Ok(LocalZone::utc())
    }

    pub fn utc() -> Self {
        LocalZone::Fixed(FixedOffset::east_opt(0).expect("UTC offset is valid"))
    }

    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            LocalZone::Named(tz) => instant.with_timezone(tz).date_naive(),
            LocalZone::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    pub fn local_time(&self, instant: DateTime<Utc>) -> NaiveTime {
        match self {
            LocalZone::Named(tz) => instant.with_timezone(tz).time(),
            LocalZone::Fixed(offset) => instant.with_timezone(offset).time(),
        }
    }

    /// Resolve a local wall time on `date` to an instant. The offset is the
    /// one in force *at that wall time*, which keeps the result correct
    /// across daylight-saving transitions. An ambiguous wall time takes the
    /// earlier reading; a nonexistent one (spring-forward gap) slides
    /// forward one hour.
    pub fn at(&self, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
        let naive = date
            .and_hms_opt(hour, minute, 0)
            .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
        match self {
            LocalZone::Named(tz) => match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => dt.with_timezone(&Utc),
                LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
                LocalResult::None => {
                    let shifted = naive + Duration::hours(1);
                    match tz.from_local_datetime(&shifted) {
                        LocalResult::Single(dt) => dt.with_timezone(&Utc),
                        LocalResult::Ambiguous(first, _) => first.with_timezone(&Utc),
                        LocalResult::None => Utc.from_utc_datetime(&naive),
                    }
                }
            },
            LocalZone::Fixed(offset) => Utc.from_utc_datetime(
                &(naive - Duration::seconds(offset.local_minus_utc() as i64)),
            ),
        }
    }

    pub fn offset_minutes_at(&self, instant: DateTime<Utc>) -> i32 {
        match self {
            LocalZone::Named(tz) => {
                instant.with_timezone(tz).offset().fix().local_minus_utc() / 60
            }
            LocalZone::Fixed(offset) => offset.local_minus_utc() / 60,
        }
    }
}

/// Wall time at `hour:minute` on the local day of `reference`, shifted by
/// `day_offset` days.
pub fn build_zoned_datetime(
    zone: &LocalZone,
    reference: DateTime<Utc>,
    hour: u32,
    minute: u32,
    day_offset: i64,
) -> DateTime<Utc> {
    let date = zone.local_date(reference) + Duration::days(day_offset);
    zone.at(date, hour, minute)
}

pub fn is_before_working_start(zone: &LocalZone, instant: DateTime<Utc>, start_hour: u32) -> bool {
    let date = zone.local_date(instant);
    instant < zone.at(date, start_hour, 0)
}

pub fn is_after_working_end(zone: &LocalZone, instant: DateTime<Utc>, end_hour: u32) -> bool {
    let date = zone.local_date(instant);
    instant > zone.at(date, end_hour, 0)
}

/// The working-window start on the local day of `instant`.
pub fn start_of_working_day(
    zone: &LocalZone,
    instant: DateTime<Utc>,
    start_hour: u32,
) -> DateTime<Utc> {
    zone.at(zone.local_date(instant), start_hour, 0)
}

/// Working-window [start, end) on the local day `days_ahead` days after the
/// local day of `reference`.
pub fn working_day_bounds(
    zone: &LocalZone,
    reference: DateTime<Utc>,
    days_ahead: i64,
    start_hour: u32,
    end_hour: u32,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = zone.local_date(reference) + Duration::days(days_ahead);
    (zone.at(date, start_hour, 0), zone.at(date, end_hour, 0))
}

/// Align `instant` up to the next multiple of `increment_minutes` relative
/// to the top of its hour.
pub fn align_to_increment(instant: DateTime<Utc>, increment_minutes: i64) -> DateTime<Utc> {
    if increment_minutes <= 0 {
        return instant;
    }
    let subminute =
        Duration::seconds(instant.second() as i64) + Duration::nanoseconds(instant.nanosecond() as i64);
    let floored = instant - subminute;
    let minute = floored.minute() as i64;
    let over = minute % increment_minutes;
    if over == 0 {
        if subminute.is_zero() {
            return instant;
        }
        return floored + Duration::minutes(increment_minutes);
    }
    floored + Duration::minutes(increment_minutes - over)
}
