use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::{DeltaTime, LeapSeconds, Mjd};
use crate::{Error, Result};

const MAX_DAY: [u8; 13] = [0, 31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

const MONTH_NAME: [&str; 13] = [
    "",
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Seconds since 1970 from which on the TT offset of 32.184s is applied.
const TT_EPOCH_SECS: i64 = 220_924_800;
const TT_OFFSET: f64 = 32.184;
/// MJD of 1970-01-01.
pub(crate) const MJD_1970: i64 = 40587;

/// Day number after Fliegel & Van Flandern, relative to MJD 0.
fn day_number(year: i64, month: i64, day: i64) -> i64 {
    let j1 = 1461 * (year + 4800 + (month - 14) / 12) / 4;
    let j2 = 367 * (month - 2 - (month - 14) / 12 * 12) / 12;
    let j3 = 3 * ((year + 4900 + (month - 14) / 12) / 100) / 4;
    (day - 32075 + j1 + j2 - j3) - 2_400_001
}

/// A UTC time with microsecond resolution, rendered as
/// `yyyy-mm-ddThh:mm:ss.ffffff`.
///
/// Ordering follows the canonical string. A second of 60 marks a leap second.
///
/// ```
/// use cheops::time::Utc;
///
/// let utc: Utc = "2015-04-06T13:02:17.040".parse().unwrap();
/// assert_eq!(utc.to_string(), "2015-04-06T13:02:17.040000");
/// assert_eq!(utc.file_name_pattern(), "TU2015-04-06T13-02-17");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Utc {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
}

impl Default for Utc {
    /// 1970-01-01T00:00:00.000000, the "not set" value.
    fn default() -> Self {
        Utc {
            year: 1970,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            micros: 0,
        }
    }
}

impl Utc {
    /// Create from components.
    ///
    /// # Errors
    /// [Error::Time] naming the first component out of range.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        fraction: f64,
    ) -> Result<Self> {
        if !(1970..=2037).contains(&year) {
            return Err(Error::Time(format!(
                "The year of a utc has to be in the range from 1970 to 2037. UTC - constructor found {year}"
            )));
        }
        let utc = Utc {
            year,
            month,
            day,
            hour,
            minute,
            second,
            micros: 0,
        };
        utc.check_components()?;
        if !(-0.000_000_5..1.0).contains(&fraction) {
            return Err(Error::Time(format!(
                "The fraction of a second of a utc has to be less than 1.0. UTC - constructor found {fraction:.6}"
            )));
        }
        // a fraction just below 1.0 must not render as 7 digits
        let micros = ((fraction * 1_000_000.0 + 0.5) as i64).clamp(0, 999_999) as u32;
        Ok(Utc { micros, ..utc })
    }

    /// Range of everything but the year; 60 is allowed for the leap second.
    fn check_components(&self) -> Result<()> {
        let Utc {
            month,
            day,
            hour,
            minute,
            second,
            ..
        } = *self;
        if !(1..=12).contains(&month) {
            return Err(Error::Time(format!(
                "The month of a utc has to be in the range from 1 to 12. UTC - constructor found {month}"
            )));
        }
        let max_day = MAX_DAY[month as usize];
        if day < 1 || day > max_day {
            return Err(Error::Time(format!(
                "The day of a utc for month {} has to be in the range from 1 to {max_day}. UTC - constructor found {day}",
                MONTH_NAME[month as usize]
            )));
        }
        if hour > 23 {
            return Err(Error::Time(format!(
                "The hour of a utc has to be in the range from 0 to 23. UTC - constructor found {hour}"
            )));
        }
        if minute > 59 {
            return Err(Error::Time(format!(
                "The minute of a utc has to be in the range from 0 to 59. UTC - constructor found {minute}"
            )));
        }
        if second > 60 {
            return Err(Error::Time(format!(
                "The second of a utc has to be in the range from 0 to 60. UTC - constructor found {second}"
            )));
        }
        Ok(())
    }

    /// The current system time, truncated to whole seconds.
    ///
    /// # Errors
    /// If the system clock is outside the supported year range.
    pub fn now() -> Result<Self> {
        let now = chrono::Utc::now();
        Self::from_datetime(&now, 0.0)
    }

    fn from_datetime(dt: &DateTime<chrono::Utc>, fraction: f64) -> Result<Self> {
        let year = u16::try_from(dt.year())
            .map_err(|_| Error::Time(format!("year {} out of range", dt.year())))?;
        Utc::new(
            year,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            fraction,
        )
    }

    fn gmtime(seconds: i64, fraction: f64) -> Result<Self> {
        let dt = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| Error::Time(format!("{seconds} seconds since 1970 out of range")))?;
        Self::from_datetime(&dt, fraction)
    }

    /// Convert seconds since 1970 on the TT-like scale produced by the
    /// arithmetic below (leap seconds included, 32.184s from 1977) to UTC.
    pub(crate) fn from_seconds(
        mut seconds: i64,
        mut fraction: f64,
        leaps: &LeapSeconds,
    ) -> Result<Self> {
        if seconds >= TT_EPOCH_SECS {
            seconds -= 32;
            fraction -= 0.184;
        }
        if fraction < -0.000_000_5 {
            fraction += 1.0;
            seconds -= 1;
        }

        let first = Self::gmtime(seconds, fraction)?;
        let leaps1 = leaps.at(&first);
        seconds -= i64::from(leaps1);
        let second = Self::gmtime(seconds, fraction)?;
        let leaps2 = leaps.at(&second);
        if leaps1 == leaps2 {
            return Ok(second);
        }

        seconds += i64::from(leaps1) - i64::from(leaps2);
        let utc = Self::gmtime(seconds, fraction)?;
        if utc.minute == 0 && utc.second == 0 {
            // inside the inserted leap second
            let mut utc = Self::gmtime(seconds - 1, fraction)?;
            utc.second += 1;
            return Ok(utc);
        }
        Ok(utc)
    }

    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }
    #[must_use]
    pub fn month(&self) -> u8 {
        self.month
    }
    #[must_use]
    pub fn day(&self) -> u8 {
        self.day
    }
    #[must_use]
    pub fn hour(&self) -> u8 {
        self.hour
    }
    #[must_use]
    pub fn minute(&self) -> u8 {
        self.minute
    }
    #[must_use]
    pub fn second(&self) -> u8 {
        self.second
    }
    #[must_use]
    pub fn sec_fraction(&self) -> f64 {
        f64::from(self.micros) / 1_000_000.0
    }

    /// True for the default value 1970-01-01T00:00:00.000000.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Utc::default()
    }

    #[must_use]
    pub fn to_string_without_fraction(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    /// The UTC as used in file names: `TUyyyy-mm-ddThh-mm-ss`.
    #[must_use]
    pub fn file_name_pattern(&self) -> String {
        format!(
            "TU{:04}-{:02}-{:02}T{:02}-{:02}-{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }

    fn day_number(&self) -> i64 {
        day_number(
            i64::from(self.year),
            i64::from(self.month),
            i64::from(self.day),
        )
    }

    fn seconds_of_day(&self, leaps: &LeapSeconds) -> f64 {
        f64::from(self.hour) * 3600.0
            + f64::from(self.minute) * 60.0
            + f64::from(self.second)
            + self.sec_fraction()
            + f64::from(leaps.at(self))
    }

    /// Elapsed time from `other` to `self`, leap seconds included.
    #[must_use]
    pub fn diff(&self, other: &Utc, leaps: &LeapSeconds) -> DeltaTime {
        let days = (self.day_number() - other.day_number()) as f64;
        DeltaTime::from(
            days * 86400.0 + self.seconds_of_day(leaps) - other.seconds_of_day(leaps),
        )
    }

    /// Shift by `delta`, leap seconds included.
    ///
    /// # Errors
    /// [Error::Time] if the result is outside the supported year range.
    pub fn add(&self, delta: DeltaTime, leaps: &LeapSeconds) -> Result<Utc> {
        let mut seconds = self.seconds_of_day(leaps);
        seconds += ((self.day_number() - MJD_1970) as f64) * 86400.0 + delta.seconds();
        if self.year >= 1977 {
            seconds += TT_OFFSET;
        }
        let whole = seconds.trunc();
        Utc::from_seconds(whole as i64, seconds - whole, leaps)
    }

    /// Shift by `-delta`.
    ///
    /// # Errors
    /// See [Utc::add].
    pub fn sub(&self, delta: DeltaTime, leaps: &LeapSeconds) -> Result<Utc> {
        self.add(-delta, leaps)
    }

    #[must_use]
    pub fn to_mjd(&self, leaps: &LeapSeconds) -> Mjd {
        let tt = if self.year >= 1977 { TT_OFFSET } else { 0.0 };
        let seconds = f64::from(self.second) + self.sec_fraction() + f64::from(leaps.at(self)) + tt;
        let day_fraction =
            f64::from(self.hour) / 24.0 + f64::from(self.minute) / 1440.0 + seconds / 86400.0;
        Mjd::from(self.day_number() as f64 + day_fraction)
    }
}

impl Display for Utc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.to_string_without_fraction(),
            self.micros
        )
    }
}

fn format_error(expected: &str, found: &str) -> Error {
    Error::Time(format!(
        "The format of the UTC as string is not as expected.Expected: {expected}, but found: {found}"
    ))
}

fn field<T: FromStr>(s: &str, range: std::ops::Range<usize>, input: &str) -> Result<T> {
    s.get(range)
        .filter(|f| f.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| format_error("yyyy-mm-ddThh:mm:ss.ffffff", input))
}

impl FromStr for Utc {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let canonical = if let Some(rest) = s.strip_prefix("TU") {
            let b = s.as_bytes();
            if s.len() != 21
                || !s.is_ascii()
                || b[6] != b'-'
                || b[9] != b'-'
                || b[12] != b'T'
                || b[15] != b'-'
                || b[18] != b'-'
            {
                return Err(format_error("TUyyyy-mm-ddThh-mm-ss", s));
            }
            let mut utc = rest.to_string();
            utc.replace_range(13..14, ":");
            utc.replace_range(16..17, ":");
            utc + ".000000"
        } else {
            let b = s.as_bytes();
            let separators = b.len() >= 19
                && b[4] == b'-'
                && b[7] == b'-'
                && b[10] == b'T'
                && b[13] == b':'
                && b[16] == b':';
            if separators && b.len() == 19 {
                format!("{s}.000000")
            } else if separators && b[19] == b'.' && s.is_ascii() {
                let mut utc: String = s.chars().take(26).collect();
                while utc.len() < 26 {
                    utc.push('0');
                }
                utc
            } else {
                return Err(format_error("yyyy-mm-ddThh:mm:ss.ffffff", s));
            }
        };

        let c = canonical.as_str();
        let utc = Utc {
            year: field(c, 0..4, s)?,
            month: field(c, 5..7, s)?,
            day: field(c, 8..10, s)?,
            hour: field(c, 11..13, s)?,
            minute: field(c, 14..16, s)?,
            second: field(c, 17..19, s)?,
            micros: field(c, 20..26, s)?,
        };
        utc.check_components()?;
        Ok(utc)
    }
}

impl TryFrom<String> for Utc {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Utc> for String {
    fn from(value: Utc) -> Self {
        value.to_string()
    }
}
