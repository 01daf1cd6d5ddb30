use std::cmp::Ordering;
use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DeltaTime, LeapSeconds, Utc};
use crate::fits::BinTable;
use crate::Result;

const MASK_48: i64 = 0xFFFF_FFFF_FFFF;
/// 48-bit OBT without the synchronisation bit.
const MASK_TICKS: i64 = 0xFFFF_FFFF_FFFE;
/// Window around a reset in which the UTC hint is not trusted.
const RESET_WINDOW_SECS: i64 = 172_800;

/// On-board time in units of 2^-16 seconds.
///
/// Bit 0 is the synchronisation flag; bits 48 and up hold the reset counter.
/// Two OBTs are equal only if their raw values are. They are ordered on
/// `raw | 1`, so OBTs that differ only in that flag compare as equal in
/// order while `==` is still false.
///
/// ```
/// use cheops::time::Obt;
///
/// let obt = Obt::with_sync(20, true);
/// assert_eq!(obt.raw(), 21);
/// assert!(obt.is_synchronized());
/// assert!(Obt::new(100) < Obt::new(102));
/// ```
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Obt(i64);

impl Obt {
    pub const TICKS_PER_SECOND: f64 = 65536.0;

    #[must_use]
    pub fn new(raw: i64) -> Self {
        Obt(raw)
    }

    #[must_use]
    pub fn with_sync(raw: i64, synchronized: bool) -> Self {
        if synchronized {
            Obt(raw | 1)
        } else {
            Obt(raw & !1)
        }
    }

    #[must_use]
    pub fn raw(&self) -> i64 {
        self.0
    }

    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.0 & 1 == 1
    }

    #[must_use]
    pub fn reset_counter(&self) -> i16 {
        (self.0 >> 48) as i16
    }

    fn ordinal(self) -> i64 {
        self.0 | 1
    }
}

impl PartialOrd for Obt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.ordinal().cmp(&other.ordinal()))
    }
}

impl From<i64> for Obt {
    fn from(value: i64) -> Self {
        Obt(value)
    }
}

impl Display for Obt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One OBT reset of the on-board computer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResetRecord {
    /// Counter valid after the reset, the first is 0.
    pub counter: i16,
    /// Approximate UTC from which on the counter is valid.
    pub validity_start: Utc,
    /// (OBT after the reset) - (OBT before the reset).
    pub obt_diff: i64,
    /// First OBT after the reset.
    pub first_obt: i64,
}

/// The reset history used to keep OBT arithmetic continuous across resets.
///
/// Without records, arithmetic keeps the reset counter of its operand.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ObtResets {
    records: Vec<ResetRecord>,
}

impl ObtResets {
    /// Records with the same counter are ignored after the first.
    #[must_use]
    pub fn new(mut records: Vec<ResetRecord>) -> Self {
        records.sort_by_key(|r| r.counter);
        records.dedup_by_key(|r| r.counter);
        ObtResets { records }
    }

    /// Read the records of a `OBT_RESET_COUNTER`/`RESET_UTC`/`OBT_DIFF`/`FIRST_OBT`
    /// table.
    ///
    /// # Errors
    /// If a cell can not be read or a `RESET_UTC` is not a valid UTC.
    pub fn from_table(table: &BinTable) -> Result<Self> {
        let mut records = Vec::with_capacity(table.num_rows());
        for row in 0..table.num_rows() {
            let counter: u16 = table.get(row, "OBT_RESET_COUNTER")?;
            let utc: String = table.get(row, "RESET_UTC")?;
            records.push(ResetRecord {
                counter: counter as i16,
                validity_start: utc.trim().parse()?,
                obt_diff: table.get(row, "OBT_DIFF")?,
                first_obt: table.get(row, "FIRST_OBT")?,
            });
        }
        Ok(Self::new(records))
    }

    /// # Errors
    /// If the file can not be read, see [ObtResets::from_table].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "reading OBT resets");
        Self::from_table(&BinTable::open(path)?)
    }

    #[must_use]
    pub fn records(&self) -> &[ResetRecord] {
        &self.records
    }

    /// Create an OBT from a raw 48-bit value, choosing the reset counter valid
    /// at `utc`. Near a reset the OBT value decides which side it belongs to.
    #[must_use]
    pub fn with_utc_hint(&self, raw: i64, utc: &Utc, leaps: &LeapSeconds) -> Obt {
        if utc.is_empty() || self.records.is_empty() {
            return Obt(raw);
        }
        let Some(mut idx) = self
            .records
            .iter()
            .rposition(|r| r.validity_start <= *utc)
        else {
            return Obt(raw);
        };

        let window = RESET_WINDOW_SECS as f64;
        let rec = &self.records[idx];
        if utc.diff(&rec.validity_start, leaps).seconds() < window
            && raw > rec.first_obt - rec.obt_diff - (RESET_WINDOW_SECS << 16)
        {
            // still counting with the clock before the reset
            idx = idx.saturating_sub(1);
        }
        if let Some(next) = self.records.get(idx + 1) {
            if next.validity_start.diff(utc, leaps).seconds() < window
                && raw < next.first_obt + (RESET_WINDOW_SECS << 16)
            {
                idx += 1;
            }
        }
        Obt((raw & MASK_48) + (i64::from(self.records[idx].counter) << 48))
    }

    fn update_reset_counter(&self, mut obt: i64, mut counter: i16) -> i64 {
        if self.records.is_empty() {
            return obt + (i64::from(counter) << 48);
        }
        let mut idx = self.records.partition_point(|r| r.counter <= counter);
        while let Some(rec) = self.records.get(idx) {
            if obt <= rec.first_obt - rec.obt_diff {
                break;
            }
            obt += rec.obt_diff;
            counter = rec.counter;
            idx += 1;
        }
        while idx > 0 {
            idx -= 1;
            let rec = &self.records[idx];
            if obt >= rec.first_obt {
                break;
            }
            obt -= rec.obt_diff;
            counter = rec.counter - 1;
        }
        obt.max(0) + (i64::from(counter) << 48)
    }

    fn shifted(&self, obt: Obt, ticks: i64) -> Obt {
        let raw = self.update_reset_counter((obt.0 & MASK_TICKS) + ticks, obt.reset_counter());
        Obt::with_sync(raw, obt.is_synchronized())
    }

    /// `obt + delta`, moving to another reset counter when the result falls
    /// on the other side of a reset. The synchronisation flag is kept.
    #[must_use]
    pub fn add(&self, obt: Obt, delta: DeltaTime) -> Obt {
        self.shifted(obt, (delta.seconds() * Obt::TICKS_PER_SECOND + 0.5) as i64)
    }

    /// `obt - delta`, see [ObtResets::add].
    #[must_use]
    pub fn sub(&self, obt: Obt, delta: DeltaTime) -> Obt {
        self.shifted(obt, -((delta.seconds() * Obt::TICKS_PER_SECOND + 0.5) as i64))
    }

    /// Elapsed OBT seconds from `b` to `a`, including the OBT jumps of the
    /// resets between their counters.
    #[must_use]
    pub fn diff(&self, a: Obt, b: Obt) -> DeltaTime {
        if a.reset_counter() == b.reset_counter() {
            return DeltaTime::from((a.ordinal() - b.ordinal()) as f64 / Obt::TICKS_PER_SECOND);
        }
        let mut reset_offset = 0;
        let start = self
            .records
            .partition_point(|r| r.counter <= b.reset_counter());
        for rec in &self.records[start..] {
            reset_offset -= rec.obt_diff;
            if rec.counter >= a.reset_counter() {
                break;
            }
        }
        let ticks = (a.ordinal() & MASK_48) - (b.ordinal() & MASK_48) + reset_offset;
        DeltaTime::from(ticks as f64 / Obt::TICKS_PER_SECOND)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// One reset on 2020-01-01: OBT 1000000000000 before the reset became 0.
    pub(crate) fn resets() -> ObtResets {
        ObtResets::new(vec![
            ResetRecord {
                counter: 0,
                validity_start: "2010-01-01T00:00:00".parse().unwrap(),
                obt_diff: 0,
                first_obt: 0,
            },
            ResetRecord {
                counter: 1,
                validity_start: "2020-01-01T00:00:00".parse().unwrap(),
                obt_diff: -1_000_000_000_000,
                first_obt: 1_000_000,
            },
        ])
    }

    fn utc(s: &str) -> Utc {
        s.parse().unwrap()
    }

    #[test]
    fn constructors() {
        assert_eq!(Obt::default().raw(), 0);
        assert_eq!(Obt::with_sync(20, true).raw(), 21);
        assert_eq!(Obt::with_sync(21, false).raw(), 20);
    }

    #[test]
    fn reset_counter_from_utc_hint() {
        let resets = resets();
        let leaps = LeapSeconds::iers();

        let obt = resets.with_utc_hint(4_000_000, &utc("2015-01-01T10:20:30"), &leaps);
        assert_eq!(obt.reset_counter(), 0);
        let obt = resets.with_utc_hint(4_000_000, &utc("2025-01-01T10:20:30"), &leaps);
        assert_eq!(obt.reset_counter(), 1);
        assert_eq!(obt.raw(), 4_000_000 + 0x1_0000_0000_0000);

        // just before the reset, UTC already after it
        let obt = resets.with_utc_hint(
            1_000_000_000_000 - 10_000,
            &utc("2020-01-01T18:23:54"),
            &leaps,
        );
        assert_eq!(obt.reset_counter(), 0);
        // just after the reset, UTC still before it
        let obt = resets.with_utc_hint(1_001_000, &utc("2019-12-30T18:23:54"), &leaps);
        assert_eq!(obt.reset_counter(), 1);

        // no hint
        let obt = resets.with_utc_hint(1_001_000, &Utc::default(), &leaps);
        assert_eq!(obt.raw(), 1_001_000);
    }

    #[test]
    fn comparison() {
        let obt1 = Obt::new(102);
        let obt2 = Obt::with_sync(100, true);
        let obt3 = Obt::new(100);
        assert!(obt2 < obt1);
        assert_ne!(obt2, obt3);
        assert_eq!(obt2.partial_cmp(&obt3), Some(Ordering::Equal));
        assert!(obt2 >= obt3);
        assert!(obt3 >= obt2);
        assert!(Obt::new(101) >= Obt::new(100));
        assert!(!obt1.is_synchronized());
        assert!(obt2.is_synchronized());
    }

    #[test]
    fn shift_by_delta() {
        let resets = ObtResets::default();
        let obt = Obt::with_sync(0x50000, true);
        let delta = DeltaTime::from(1.0);
        assert_eq!(resets.add(obt, delta).raw(), 0x60001);
        assert_eq!(resets.sub(obt, delta).raw(), 0x40001);
    }

    #[test]
    fn diff_across_reset() {
        let resets = resets();
        let obt1 = Obt::new(0);
        let obt2 = Obt::new(0x1_0000_0000_0100);
        assert_eq!(resets.diff(obt2, obt1).seconds(), 15_258_789.066_406_25);
    }

    #[test]
    fn shift_across_reset() {
        let resets = resets();
        let leaps = LeapSeconds::iers();
        let delta = DeltaTime::from(1_500_000.0 / 65536.0);

        let down = resets.with_utc_hint(2_000_000, &utc("2020-04-04T00:00:00"), &leaps);
        assert_eq!(resets.sub(down, delta).raw(), 1_000_000_500_000);

        let up = Obt::new(1_000_000_700_000);
        assert_eq!(resets.add(up, delta).raw(), 2_200_000 + 0x1_0000_0000_0000);
    }
}
