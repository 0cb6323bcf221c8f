use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Calendar layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    /// Three consecutive days starting at the anchor, binned by hour.
    #[default]
    ThreeDay,
    /// Sunday through Saturday, binned by weekday and hour.
    Week,
    /// The whole calendar month, counted per date.
    Month,
}

impl ViewMode {
    pub const ALL: [ViewMode; 3] = [ViewMode::ThreeDay, ViewMode::Week, ViewMode::Month];

    pub fn as_str(self) -> &'static str {
        match self {
            ViewMode::ThreeDay => "three_day",
            ViewMode::Week => "week",
            ViewMode::Month => "month",
        }
    }

    /// First date shown for `anchor`.
    pub fn first_day(self, anchor: NaiveDate) -> NaiveDate {
        match self {
            ViewMode::ThreeDay => anchor,
            ViewMode::Week => week_start(anchor),
            ViewMode::Month => month_start(anchor),
        }
    }

    /// Every date shown for `anchor`, in order.
    pub fn days(self, anchor: NaiveDate) -> Vec<NaiveDate> {
        let first = self.first_day(anchor);
        let end = self.end_day(anchor);
        first.iter_days().take_while(|d| *d < end).collect()
    }

    /// Exclusive end date.
    fn end_day(self, anchor: NaiveDate) -> NaiveDate {
        match self {
            ViewMode::ThreeDay => add_days(anchor, 3),
            ViewMode::Week => add_days(week_start(anchor), 7),
            ViewMode::Month => month_start(anchor)
                .checked_add_months(Months::new(1))
                .unwrap_or(NaiveDate::MAX),
        }
    }

    /// Half-open UTC interval covering the view in the time zone `tz`.
    pub fn range<Tz: TimeZone>(self, anchor: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            local_midnight(self.first_day(anchor), tz),
            local_midnight(self.end_day(anchor), tz),
        )
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "three_day" | "3day" | "day" => Ok(ViewMode::ThreeDay),
            "week" => Ok(ViewMode::Week),
            "month" => Ok(ViewMode::Month),
            other => Err(ValidationError::InvalidValue {
                field: "view".into(),
                message: format!("unknown view '{other}'"),
            }),
        }
    }
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let back = u64::from(date.weekday().num_days_from_sunday());
    date.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN)
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

/// The instant the local day `date` begins.
///
/// When midnight falls in a DST gap the day begins at the first valid
/// local time after it.
pub fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return dt.with_timezone(&Utc);
    }
    // gaps are at most a few hours wide
    (1..=4)
        .find_map(|h| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(h)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// UTC bounds `[start, end)` of the local calendar day `date`.
pub fn day_bounds<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (local_midnight(date, tz), local_midnight(add_days(date, 1), tz))
}
