use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DeltaTime, LeapSeconds, Obt, ObtResets, Utc};
use crate::fits::BinTable;
use crate::{Error, Result};

/// One OBT-UTC correlation, valid from `utc_timestamp` until the next record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CorrelationRecord {
    pub utc_timestamp: Utc,
    /// `utc_timestamp` expressed in OBT.
    pub obt_timestamp: Obt,
    pub utc: Utc,
    pub obt: Obt,
    pub gradient: f64,
    /// Constant plus variable offset in seconds.
    pub offset: f64,
}

impl CorrelationRecord {
    #[must_use]
    pub fn new(
        utc_timestamp: Utc,
        utc: Utc,
        obt: Obt,
        gradient: f64,
        offset: f64,
        leaps: &LeapSeconds,
        resets: &ObtResets,
    ) -> Self {
        let delta = (utc_timestamp.diff(&utc, leaps) - offset) / gradient;
        CorrelationRecord {
            utc_timestamp,
            obt_timestamp: resets.add(obt, delta),
            utc,
            obt,
            gradient,
            offset,
        }
    }
}

/// Piecewise linear relation between OBT and UTC.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// Sorted by `utc_timestamp`.
    records: Vec<CorrelationRecord>,
}

impl Correlation {
    #[must_use]
    pub fn new(mut records: Vec<CorrelationRecord>) -> Self {
        records.sort_by(|a, b| a.utc_timestamp.cmp(&b.utc_timestamp));
        records.dedup_by(|a, b| a.utc_timestamp == b.utc_timestamp);
        Correlation { records }
    }

    /// Read the records of correlation tables.
    ///
    /// `TC_OFFSET` replaces `OFFSET` when it is set and `OFFSET` exceeds 1e7 s.
    ///
    /// # Errors
    /// [Error::TimeReference] for a NULL gradient, or any error reading a cell.
    pub fn from_tables<'a, I>(tables: I, leaps: &LeapSeconds, resets: &ObtResets) -> Result<Self>
    where
        I: IntoIterator<Item = &'a BinTable>,
    {
        let mut records = Vec::new();
        for table in tables {
            let has_tc_offset = table.has_column("TC_OFFSET");
            for row in 0..table.num_rows() {
                let timestamp: String = table.get(row, "UTC_TIMESTAMP")?;
                let utc: String = table.get(row, "UTC")?;
                let obt: i64 = table.get(row, "OBT")?;
                let gradient: f64 = table.get(row, "GRADIENT")?;
                let mut offset: f64 = table.get(row, "OFFSET")?;
                let tc_offset: f64 = if has_tc_offset {
                    table.get(row, "TC_OFFSET")?
                } else {
                    f64::NAN
                };
                if gradient.is_nan() {
                    return Err(Error::TimeReference(
                        "GRADIENT of a OBT-UTC Correlation is NULL".to_string(),
                    ));
                }
                if !tc_offset.is_nan() && offset > 10_000_000.0 {
                    offset = tc_offset;
                }
                records.push(CorrelationRecord::new(
                    timestamp.trim().parse()?,
                    utc.trim().parse()?,
                    Obt::new(obt),
                    gradient,
                    offset,
                    leaps,
                    resets,
                ));
            }
        }
        Ok(Self::new(records))
    }

    /// # Errors
    /// If a file can not be read, see [Correlation::from_tables].
    pub fn load<P: AsRef<Path>>(
        paths: &[P],
        leaps: &LeapSeconds,
        resets: &ObtResets,
    ) -> Result<Self> {
        let tables = paths
            .iter()
            .map(|p| {
                debug!(path = %p.as_ref().display(), "reading OBT-UTC correlation");
                BinTable::open(p).map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_tables(&tables, leaps, resets)
    }

    #[must_use]
    pub fn records(&self) -> &[CorrelationRecord] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check(&self) -> Result<()> {
        if self.records.is_empty() {
            return Err(Error::TimeReference(
                "There is no OBT - UTC Correlation File defined.".to_string(),
            ));
        }
        Ok(())
    }

    /// The record with the greatest key not after the target, else the first.
    fn select(&self, not_after: impl Fn(&CorrelationRecord) -> bool) -> &CorrelationRecord {
        let idx = self.records.partition_point(not_after);
        &self.records[idx.saturating_sub(1)]
    }

    /// # Errors
    /// [Error::TimeReference] without records, [Error::Time] if the result is
    /// out of range.
    pub fn utc_of(&self, obt: Obt, leaps: &LeapSeconds, resets: &ObtResets) -> Result<Utc> {
        self.check()?;
        let rec = self.select(|r| (r.obt_timestamp.raw() | 1) <= (obt.raw() | 1));
        let delta: DeltaTime = resets.diff(obt, rec.obt) * rec.gradient + rec.offset;
        rec.utc.add(delta, leaps)
    }

    /// # Errors
    /// [Error::TimeReference] without records.
    pub fn obt_of(&self, utc: &Utc, leaps: &LeapSeconds, resets: &ObtResets) -> Result<Obt> {
        self.check()?;
        let rec = self.select(|r| r.utc_timestamp <= *utc);
        let delta = (utc.diff(&rec.utc, leaps) - rec.offset) / rec.gradient;
        Ok(resets.add(rec.obt, delta))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::obt::test::resets;

    fn correlation(leaps: &LeapSeconds, resets: &ObtResets) -> Correlation {
        let start: Utc = "2019-01-01T00:00:00".parse().unwrap();
        let after_reset: Utc = "2020-01-01T00:00:00".parse().unwrap();
        Correlation::new(vec![
            CorrelationRecord::new(
                after_reset,
                after_reset,
                Obt::new(1_000_000 + (1 << 48)),
                1.0,
                0.0,
                leaps,
                resets,
            ),
            CorrelationRecord::new(
                start,
                start,
                Obt::new(1_000_000_000),
                1.0,
                0.5,
                leaps,
                resets,
            ),
        ])
    }

    #[test]
    fn empty_is_error() {
        let leaps = LeapSeconds::iers();
        let resets = ObtResets::default();
        let err = Correlation::default()
            .utc_of(Obt::new(0), &leaps, &resets)
            .unwrap_err();
        assert!(matches!(err, Error::TimeReference(_)));
    }

    #[test]
    fn records_sorted_by_timestamp() {
        let leaps = LeapSeconds::iers();
        let resets = resets();
        let corr = correlation(&leaps, &resets);
        assert_eq!(corr.records()[0].utc.year(), 2019);
        // -0.5s, rounded towards zero in OBT ticks, sync bit of the input kept
        assert_eq!(corr.records()[0].obt_timestamp.raw(), 999_967_232);
    }

    #[test]
    fn obt_to_utc_and_back() {
        let leaps = LeapSeconds::iers();
        let resets = resets();
        let corr = correlation(&leaps, &resets);

        let obt = Obt::new(1_000_000_000 + 10 * 65536);
        let utc = corr.utc_of(obt, &leaps, &resets).unwrap();
        assert_eq!(utc.to_string(), "2019-01-01T00:00:10.500000");
        assert_eq!(corr.obt_of(&utc, &leaps, &resets).unwrap(), obt);

        let obt = Obt::new(1_000_000 + 65536 + (1 << 48));
        let utc = corr.utc_of(obt, &leaps, &resets).unwrap();
        assert_eq!(utc.to_string(), "2020-01-01T00:00:01.000000");
        assert_eq!(corr.obt_of(&utc, &leaps, &resets).unwrap(), obt);
    }

    #[test]
    fn before_first_record_uses_first() {
        let leaps = LeapSeconds::iers();
        let resets = resets();
        let corr = correlation(&leaps, &resets);
        let utc: Utc = "2018-12-31T23:59:50".parse().unwrap();
        let obt = corr.obt_of(&utc, &leaps, &resets).unwrap();
        // unsynchronized like the first record
        assert_eq!(obt.raw(), 999_311_872);
    }
}
