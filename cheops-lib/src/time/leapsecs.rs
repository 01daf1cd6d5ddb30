use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use super::Utc;
use crate::fits::BinTable;
use crate::refs::ValidRefFile;
use crate::{Error, Result};

/// TAI-UTC as published by the IERS, starting with the introduction of leap
/// seconds in 1972.
const IERS: [(u16, u8, i16); 28] = [
    (1972, 1, 10),
    (1972, 7, 11),
    (1973, 1, 12),
    (1974, 1, 13),
    (1975, 1, 14),
    (1976, 1, 15),
    (1977, 1, 16),
    (1978, 1, 17),
    (1979, 1, 18),
    (1980, 1, 19),
    (1981, 7, 20),
    (1982, 7, 21),
    (1983, 7, 22),
    (1985, 7, 23),
    (1988, 1, 24),
    (1990, 1, 25),
    (1991, 1, 26),
    (1992, 7, 27),
    (1993, 7, 28),
    (1994, 7, 29),
    (1996, 1, 30),
    (1997, 7, 31),
    (1999, 1, 32),
    (2006, 1, 33),
    (2009, 1, 34),
    (2012, 7, 35),
    (2015, 7, 36),
    (2017, 1, 37),
];

/// Table of TAI-UTC offsets keyed by the UTC from which they apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeapSeconds {
    entries: BTreeMap<Utc, i16>,
}

impl LeapSeconds {
    /// Create from `(utc, TAI-UTC)` entries.
    ///
    /// # Errors
    /// [Error::TimeReference] if there are no entries.
    pub fn new<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Utc, i16)>,
    {
        let entries: BTreeMap<Utc, i16> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(Error::TimeReference(
                "There is no leap second file defined (SOC_APP_LeapSeconds)".to_string(),
            ));
        }
        Ok(LeapSeconds { entries })
    }

    /// The built-in IERS history up to the leap second of 2017-01-01.
    #[must_use]
    pub fn iers() -> Self {
        let entries = IERS
            .iter()
            .filter_map(|(year, month, secs)| {
                Utc::new(*year, *month, 1, 0, 0, 0, 0.0)
                    .ok()
                    .map(|utc| (utc, *secs))
            })
            .collect();
        LeapSeconds { entries }
    }

    /// Read the entries of a leap second reference table.
    ///
    /// # Errors
    /// If a cell can not be read, a `UTC_TIME` is not a valid UTC, or the
    /// table is empty.
    pub fn from_table(table: &BinTable) -> Result<Self> {
        let mut entries = Vec::with_capacity(table.num_rows());
        for row in 0..table.num_rows() {
            let utc: String = table.get(row, "UTC_TIME")?;
            let tai_utc: i16 = table.get(row, "TAI_UTC")?;
            entries.push((utc.trim().parse()?, tai_utc));
        }
        Self::new(entries)
    }

    /// Load the table from the candidate reference file valid now.
    ///
    /// # Errors
    /// If no file is valid now or the file can not be read.
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self> {
        let refs = ValidRefFile::open(files)?;
        let path = refs.file_for(&Utc::now()?)?;
        debug!(path = %path.display(), "reading leap seconds");
        let table = BinTable::open(path)?;
        Self::from_table(&table)
    }

    /// TAI-UTC at `utc`, 0 before the first entry.
    #[must_use]
    pub fn at(&self, utc: &Utc) -> i16 {
        self.entries
            .range(..=utc)
            .next_back()
            .map_or(0, |(_, secs)| *secs)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case("1970-01-01T00:00:00", 0; "before first entry")]
    #[test_case("1972-01-01T00:00:00", 10; "first entry")]
    #[test_case("1999-12-31T23:59:59", 32; "between entries")]
    #[test_case("2016-12-31T23:59:60", 36; "inside leap second")]
    #[test_case("2017-01-01T00:00:00", 37; "last entry")]
    #[test_case("2030-06-01T00:00:00", 37; "after last entry")]
    fn iers_lookup(utc: &str, expected: i16) {
        let leaps = LeapSeconds::iers();
        assert_eq!(leaps.at(&utc.parse().unwrap()), expected);
    }

    #[test]
    fn empty_is_error() {
        let err = LeapSeconds::new(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::TimeReference(_)));
    }
}
