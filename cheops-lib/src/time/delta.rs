use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A time difference in seconds, either OBT or UTC seconds.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, PartialOrd)]
#[derive(
    derive_more::From,
    derive_more::Add,
    derive_more::Sub,
    derive_more::Mul,
    derive_more::Div,
    derive_more::Neg,
)]
pub struct DeltaTime(f64);

impl DeltaTime {
    #[must_use]
    pub fn seconds(&self) -> f64 {
        self.0
    }
}

impl Add<f64> for DeltaTime {
    type Output = DeltaTime;

    fn add(self, rhs: f64) -> Self::Output {
        DeltaTime(self.0 + rhs)
    }
}

impl Sub<f64> for DeltaTime {
    type Output = DeltaTime;

    fn sub(self, rhs: f64) -> Self::Output {
        DeltaTime(self.0 - rhs)
    }
}
