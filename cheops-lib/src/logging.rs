//! Severity levels, alerts and progress reports on top of `tracing`.
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn, Level};

use crate::{Error, Result};

/// Log severity as used in job orders.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Progress,
    Warning,
    Alert,
    Error,
}

impl Severity {
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Severity::Debug => Level::DEBUG,
            Severity::Info | Severity::Progress => Level::INFO,
            Severity::Warning => Level::WARN,
            Severity::Alert | Severity::Error => Level::ERROR,
        }
    }

    #[must_use]
    pub fn level_filter(self) -> LevelFilter {
        LevelFilter::from_level(self.level())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Severity::Debug),
            "INFO" => Ok(Severity::Info),
            "PROGRESS" => Ok(Severity::Progress),
            "WARN" | "WARNING" => Ok(Severity::Warning),
            "ALERT" => Ok(Severity::Alert),
            "ERROR" => Ok(Severity::Error),
            _ => Err(Error::JobOrder(format!(
                "unknown log level {s:?}, expected one of DEBUG, INFO, PROGRESS, WARNING, ALERT, ERROR"
            ))),
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Progress => "PROGRESS",
            Severity::Warning => "WARNING",
            Severity::Alert => "ALERT",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Numeric code identifying an operator alert.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlertId(pub i64);

impl Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Emit an alert as an error event carrying `alert_id`.
pub fn alert(id: AlertId, msg: &str) {
    error!(alert_id = id.0, "{id} {msg}");
}

/// Report processing progress, clamped to 0..=100 percent. Returns the value
/// reported.
pub fn progress(percent: i64) -> u8 {
    let percent = percent.clamp(0, 100) as u8;
    info!(progress = percent, "{percent}");
    percent
}

/// Log a message at a [Severity].
pub fn log(severity: Severity, msg: &str) {
    match severity {
        Severity::Debug => debug!("{msg}"),
        Severity::Info => info!("{msg}"),
        Severity::Progress => info!(progress = true, "{msg}"),
        Severity::Warning => warn!("{msg}"),
        Severity::Alert | Severity::Error => error!("{msg}"),
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    #[test_case("debug", Severity::Debug)]
    #[test_case("INFO", Severity::Info)]
    #[test_case("Progress", Severity::Progress)]
    #[test_case("WARN", Severity::Warning)]
    #[test_case("warning", Severity::Warning)]
    #[test_case("ALERT", Severity::Alert)]
    #[test_case(" ERROR ", Severity::Error)]
    fn parse_severity(s: &str, expected: Severity) {
        assert_eq!(s.parse::<Severity>().unwrap(), expected);
    }

    #[test]
    fn unknown_severity() {
        assert!("LOUD".parse::<Severity>().is_err());
    }

    #[test]
    fn level_mapping() {
        assert_eq!(Severity::Progress.level(), Level::INFO);
        assert_eq!(Severity::Alert.level(), Level::ERROR);
        assert_eq!(Severity::Warning.level_filter(), LevelFilter::WARN);
        assert!(Severity::Debug < Severity::Error);
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(progress(-5), 0);
        assert_eq!(progress(42), 42);
        assert_eq!(progress(250), 100);
        alert(AlertId(7), "still works without a subscriber");
    }
}
