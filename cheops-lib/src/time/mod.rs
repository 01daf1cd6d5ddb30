//! CHEOPS time systems: UTC, on-board time (OBT), MJD and BJD.
//!
//! Conversions that depend on reference data (leap seconds, OBT resets and the
//! OBT-UTC correlation) take that data explicitly, usually via a [TimeContext].
mod context;
mod correlation;
mod delta;
mod leapsecs;
mod mjd;
mod obt;
mod utc;

pub use context::TimeContext;
pub use correlation::{Correlation, CorrelationRecord};
pub use delta::DeltaTime;
pub use leapsecs::LeapSeconds;
pub use mjd::{BarycentricOffset, Bjd, Mjd, NoBarycentricCorrection, MJD_TO_JD};
pub use obt::{Obt, ObtResets, ResetRecord};
pub use utc::Utc;
