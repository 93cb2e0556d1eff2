use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Monday-aligned point on the week timeline.
///
/// Stored as whole weeks since Monday 0001-01-01 (proleptic Gregorian), so two
/// points compare and subtract exactly. Every date inside a week maps to the
/// same point. Serializes as a `YYYY-MM-DD` Monday in human-readable formats
/// and as the raw week index otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeekPoint(i64);

impl WeekPoint {
    pub const fn from_index(weeks: i64) -> Self {
        Self(weeks)
    }

    pub const fn index(self) -> i64 {
        self.0
    }

    /// Snap a date to the Monday of its ISO week.
    pub fn from_date(date: NaiveDate) -> Self {
        // Day 1 of the common era is a Monday.
        Self((i64::from(date.num_days_from_ce()) - 1).div_euclid(7))
    }

    /// The Monday this point stands for, or `None` past chrono's calendar range.
    pub fn to_date(self) -> Option<NaiveDate> {
        let days = self.0.checked_mul(7)?.checked_add(1)?;
        NaiveDate::from_num_days_from_ce_opt(i32::try_from(days).ok()?)
    }

    pub const fn add_weeks(self, weeks: i64) -> Self {
        Self(self.0 + weeks)
    }

    /// Signed number of weeks from `self` to `later`.
    pub const fn weeks_until(self, later: WeekPoint) -> i64 {
        later.0 - self.0
    }

    /// `(iso_year, iso_week)`; week 1 is the week holding January 4th.
    pub fn iso_week(self) -> Option<(i32, u32)> {
        self.to_date().map(|d| {
            let w = d.iso_week();
            (w.year(), w.week())
        })
    }

    pub fn week_number(self) -> Option<u32> {
        self.iso_week().map(|(_, week)| week)
    }
}

impl From<NaiveDate> for WeekPoint {
    fn from(date: NaiveDate) -> Self {
        Self::from_date(date)
    }
}

impl fmt::Display for WeekPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => write!(f, "week#{}", self.0),
        }
    }
}

impl Serialize for WeekPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.to_date() {
            Some(date) if serializer.is_human_readable() => {
                serializer.collect_str(&date.format("%Y-%m-%d"))
            }
            _ => serializer.serialize_i64(self.0),
        }
    }
}

struct WeekPointVisitor;

impl Visitor<'_> for WeekPointVisitor {
    type Value = WeekPoint;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a YYYY-MM-DD date or a week index")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<WeekPoint, E> {
        Ok(WeekPoint(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<WeekPoint, E> {
        i64::try_from(v)
            .map(WeekPoint)
            .map_err(|_| E::custom("week index out of range"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<WeekPoint, E> {
        NaiveDate::parse_from_str(v, "%Y-%m-%d")
            .map(WeekPoint::from_date)
            .map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for WeekPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(WeekPointVisitor)
        } else {
            deserializer.deserialize_i64(WeekPointVisitor)
        }
    }
}
