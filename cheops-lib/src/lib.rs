#![doc = include_str!("../README.md")]

mod error;

pub mod fits;
pub mod hk;
pub mod ids;
pub mod joborder;
pub mod logging;
pub mod orbit;
pub mod refs;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
