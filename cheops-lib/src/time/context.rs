use std::path::Path;

use super::{Correlation, DeltaTime, LeapSeconds, Mjd, Obt, ObtResets, Utc};
use crate::Result;

/// Time reference data needed to convert between OBT, UTC and MJD.
///
/// ```
/// use cheops::time::{DeltaTime, TimeContext};
///
/// let ctx = TimeContext::default();
/// let utc = "2015-04-06T13:02:17.040".parse().unwrap();
/// let later = ctx.utc_add(&utc, DeltaTime::from(61.5)).unwrap();
/// assert_eq!(later.to_string(), "2015-04-06T13:03:18.540000");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TimeContext {
    pub leaps: LeapSeconds,
    pub resets: ObtResets,
    pub correlation: Correlation,
}

impl Default for TimeContext {
    /// Built-in leap seconds, no resets and no correlation.
    fn default() -> Self {
        TimeContext {
            leaps: LeapSeconds::iers(),
            resets: ObtResets::default(),
            correlation: Correlation::default(),
        }
    }
}

impl TimeContext {
    #[must_use]
    pub fn new(leaps: LeapSeconds, resets: ObtResets, correlation: Correlation) -> Self {
        TimeContext {
            leaps,
            resets,
            correlation,
        }
    }

    /// Load reference tables. Missing inputs fall back to the built-in leap
    /// seconds, no resets, and no correlation.
    ///
    /// # Errors
    /// If any of the given files can not be read.
    pub fn load<P: AsRef<Path>>(
        leap_second_files: &[P],
        reset_file: Option<P>,
        correlation_files: &[P],
    ) -> Result<Self> {
        let leaps = if leap_second_files.is_empty() {
            LeapSeconds::iers()
        } else {
            LeapSeconds::load(leap_second_files)?
        };
        let resets = match reset_file {
            Some(path) => ObtResets::load(path)?,
            None => ObtResets::default(),
        };
        let correlation = Correlation::load(correlation_files, &leaps, &resets)?;
        Ok(Self::new(leaps, resets, correlation))
    }

    /// # Errors
    /// No correlation records, or a result out of range.
    pub fn obt_to_utc(&self, obt: Obt) -> Result<Utc> {
        self.correlation.utc_of(obt, &self.leaps, &self.resets)
    }

    /// # Errors
    /// No correlation records.
    pub fn utc_to_obt(&self, utc: &Utc) -> Result<Obt> {
        self.correlation.obt_of(utc, &self.leaps, &self.resets)
    }

    #[must_use]
    pub fn utc_to_mjd(&self, utc: &Utc) -> Mjd {
        utc.to_mjd(&self.leaps)
    }

    /// # Errors
    /// If the MJD is outside the supported UTC range.
    pub fn mjd_to_utc(&self, mjd: Mjd) -> Result<Utc> {
        mjd.to_utc(&self.leaps)
    }

    /// # Errors
    /// If the result is outside the supported UTC range.
    pub fn utc_add(&self, utc: &Utc, delta: DeltaTime) -> Result<Utc> {
        utc.add(delta, &self.leaps)
    }

    #[must_use]
    pub fn utc_diff(&self, a: &Utc, b: &Utc) -> DeltaTime {
        a.diff(b, &self.leaps)
    }

    #[must_use]
    pub fn obt_add(&self, obt: Obt, delta: DeltaTime) -> Obt {
        self.resets.add(obt, delta)
    }

    #[must_use]
    pub fn obt_diff(&self, a: Obt, b: Obt) -> DeltaTime {
        self.resets.diff(a, b)
    }

    /// OBT with the reset counter valid around `utc`.
    #[must_use]
    pub fn obt_with_utc_hint(&self, raw: i64, utc: &Utc) -> Obt {
        self.resets.with_utc_hint(raw, utc, &self.leaps)
    }
}
