use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{HOUR_MS, Ms, Span};

/// Wall-clock time of day with minute precision, written as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallClock {
    minutes: u16,
}

impl WallClock {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    pub fn hour(&self) -> u32 {
        u32::from(self.minutes / 60)
    }

    pub fn minute(&self) -> u32 {
        u32::from(self.minutes % 60)
    }

    pub fn minutes_since_midnight(&self) -> u32 {
        u32::from(self.minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWallClockError(String);

impl fmt::Display for ParseWallClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid wall-clock time {:?}, expected HH:MM", self.0)
    }
}

impl std::error::Error for ParseWallClockError {}

impl FromStr for WallClock {
    type Err = ParseWallClockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseWallClockError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        let hour: u32 = h.parse().map_err(|_| err())?;
        let minute: u32 = m.parse().map_err(|_| err())?;
        WallClock::new(hour, minute).ok_or_else(err)
    }
}

impl TryFrom<String> for WallClock {
    type Error = ParseWallClockError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallClock> for String {
    fn from(w: WallClock) -> Self {
        w.to_string()
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Opening window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    pub open: WallClock,
    /// `00:00` closes at midnight at the end of the day.
    pub close: WallClock,
}

impl DayHours {
    pub fn open_minutes(&self) -> u32 {
        self.open.minutes_since_midnight()
    }

    pub fn close_minutes(&self) -> u32 {
        match self.close.minutes_since_midnight() {
            0 => 24 * 60,
            m => m,
        }
    }

    /// First bookable whole hour: an opening at 06:30 starts slots at 07:00.
    pub fn first_slot_hour(&self) -> u32 {
        self.open_minutes().div_ceil(60)
    }

    /// Exclusive end of bookable whole hours: a close at 22:30 ends slots at 22:00.
    pub fn slot_end_hour(&self) -> u32 {
        self.close_minutes() / 60
    }

    /// Whether `[start_min, end_min)` (minutes since local midnight) lies inside the window.
    pub fn covers(&self, start_min: u32, end_min: u32) -> bool {
        self.open_minutes() <= start_min && end_min <= self.close_minutes()
    }
}

/// Weekly operating hours. A missing day means the venue is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingHours {
    pub monday: Option<DayHours>,
    pub tuesday: Option<DayHours>,
    pub wednesday: Option<DayHours>,
    pub thursday: Option<DayHours>,
    pub friday: Option<DayHours>,
    pub saturday: Option<DayHours>,
    pub sunday: Option<DayHours>,
}

impl OperatingHours {
    /// Same hours every day of the week.
    pub fn every_day(hours: DayHours) -> Self {
        Self {
            monday: Some(hours),
            tuesday: Some(hours),
            wednesday: Some(hours),
            thursday: Some(hours),
            friday: Some(hours),
            saturday: Some(hours),
            sunday: Some(hours),
        }
    }

    pub fn for_weekday(&self, day: Weekday) -> Option<&DayHours> {
        match day {
            Weekday::Mon => self.monday.as_ref(),
            Weekday::Tue => self.tuesday.as_ref(),
            Weekday::Wed => self.wednesday.as_ref(),
            Weekday::Thu => self.thursday.as_ref(),
            Weekday::Fri => self.friday.as_ref(),
            Weekday::Sat => self.saturday.as_ref(),
            Weekday::Sun => self.sunday.as_ref(),
        }
    }

    /// Resolve the opening window for a calendar date.
    pub fn resolve(&self, date: NaiveDate) -> Option<&DayHours> {
        self.for_weekday(date.weekday())
    }
}

/// Venue-local clock: converts between Unix milliseconds and local dates.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    /// Offsets outside ±24h fall back to UTC.
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    fn local(&self, t: Ms) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(t).map(|dt| dt.with_timezone(&self.offset))
    }

    pub fn date_of(&self, t: Ms) -> Option<NaiveDate> {
        self.local(t).map(|dt| dt.date_naive())
    }

    /// Local `(date, hour)` of an instant.
    pub fn date_hour(&self, t: Ms) -> Option<(NaiveDate, u32)> {
        self.local(t).map(|dt| (dt.date_naive(), dt.hour()))
    }

    /// `[local midnight, next local midnight)` of `date`, in Unix ms.
    pub fn day_span(&self, date: NaiveDate) -> Option<Span> {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        let start = self
            .offset
            .from_local_datetime(&midnight)
            .single()?
            .timestamp_millis();
        Some(Span::new(start, start + 24 * HOUR_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(open: &str, close: &str) -> DayHours {
        DayHours {
            open: open.parse().unwrap(),
            close: close.parse().unwrap(),
        }
    }

    #[test]
    fn wall_clock_parse_and_display() {
        let w: WallClock = "06:05".parse().unwrap();
        assert_eq!(w.hour(), 6);
        assert_eq!(w.minute(), 5);
        assert_eq!(w.to_string(), "06:05");
        assert!("24:00".parse::<WallClock>().is_err());
        assert!("7".parse::<WallClock>().is_err());
        assert!("07:60".parse::<WallClock>().is_err());
    }

    #[test]
    fn closed_day_resolves_to_none() {
        let oh = OperatingHours {
            monday: Some(hours("06:00", "22:00")),
            ..Default::default()
        };
        // 2024-01-01 is a Monday
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(oh.resolve(monday).is_some());
        assert!(oh.resolve(monday.succ_opt().unwrap()).is_none());
    }

    #[test]
    fn slot_bounds_use_whole_hours() {
        let h = hours("06:30", "22:30");
        assert_eq!(h.first_slot_hour(), 7);
        assert_eq!(h.slot_end_hour(), 22);

        let h = hours("06:00", "22:00");
        assert_eq!(h.first_slot_hour(), 6);
        assert_eq!(h.slot_end_hour(), 22);
    }

    #[test]
    fn midnight_close_means_end_of_day() {
        let h = hours("08:00", "00:00");
        assert_eq!(h.slot_end_hour(), 24);
        assert!(h.covers(22 * 60, 24 * 60));
    }

    #[test]
    fn operating_hours_from_json_with_missing_days() {
        let oh: OperatingHours =
            serde_json::from_str(r#"{"saturday": {"open": "07:00", "close": "23:00"}}"#).unwrap();
        assert!(oh.monday.is_none());
        assert_eq!(oh.saturday, Some(hours("07:00", "23:00")));
    }

    #[test]
    fn local_clock_day_span_respects_offset() {
        // UTC+8
        let clock = LocalClock::new(8 * 60);
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = clock.day_span(date).unwrap();
        // Local midnight Jan 1 is 16:00 UTC Dec 31
        let expected = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_opt(16, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        assert_eq!(day.start, expected);
        assert_eq!(day.duration_ms(), 24 * HOUR_MS);
        assert_eq!(clock.date_hour(day.start + 9 * HOUR_MS), Some((date, 9)));
    }
}
