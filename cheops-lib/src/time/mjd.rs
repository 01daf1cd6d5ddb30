use serde::{Deserialize, Serialize};

use super::utc::MJD_1970;
use super::{LeapSeconds, Utc};
use crate::Result;

/// Offset between Julian and modified Julian dates.
pub const MJD_TO_JD: f64 = 2_400_000.5;

/// Modified Julian date on the TT scale.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd, derive_more::From)]
pub struct Mjd(f64);

impl Default for Mjd {
    fn default() -> Self {
        Mjd(f64::NAN)
    }
}

impl Mjd {
    #[must_use]
    pub fn value(&self) -> f64 {
        self.0
    }

    /// # Errors
    /// [crate::Error::Time] if the date is outside the supported UTC range.
    pub fn to_utc(&self, leaps: &LeapSeconds) -> Result<Utc> {
        let since_1970 = (self.0 - MJD_1970 as f64) * 24.0 * 3600.0;
        let seconds = since_1970.trunc();
        Utc::from_seconds(seconds as i64, since_1970 - seconds, leaps)
    }

    #[must_use]
    pub fn to_bjd<B: BarycentricOffset + ?Sized>(&self, offset: &B) -> Bjd {
        Bjd(self.0 + offset.offset_days(self.0))
    }
}

/// Barycentric Julian date.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, PartialOrd, derive_more::From)]
pub struct Bjd(f64);

impl Default for Bjd {
    fn default() -> Self {
        Bjd(f64::NAN)
    }
}

impl Bjd {
    #[must_use]
    pub fn value(&self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn to_mjd<B: BarycentricOffset + ?Sized>(&self, offset: &B) -> Mjd {
        Mjd(self.0 - offset.offset_days(self.0 - MJD_TO_JD))
    }
}

/// Days to add to an MJD to get the BJD of a target, i.e. the light travel
/// time correction plus [MJD_TO_JD].
pub trait BarycentricOffset {
    fn offset_days(&self, mjd: f64) -> f64;
}

impl<F> BarycentricOffset for F
where
    F: Fn(f64) -> f64,
{
    fn offset_days(&self, mjd: f64) -> f64 {
        self(mjd)
    }
}

/// Julian date without light travel time correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBarycentricCorrection;

impl BarycentricOffset for NoBarycentricCorrection {
    fn offset_days(&self, _mjd: f64) -> f64 {
        MJD_TO_JD
    }
}
