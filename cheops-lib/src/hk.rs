//! Conversion of housekeeping TM packets into raw (PRW) FITS tables.
//!
//! Tables are described by JSON definitions:
//!
//! ```json
//! [{
//!   "name": "SCI_PRW_HkDefault",
//!   "apid": 972,
//!   "sid": 1,
//!   "columns": [
//!     {"name": "ADC_TEMP", "offset": 2, "bytes": 2, "kind": "signed", "unit": "degC"}
//!   ]
//! }]
//! ```
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::fits::{BinTable, Cell, Column, ColumnKind, FitsFile, Header, ProgramInfo};
use crate::ids::{PassId, VisitId};
use crate::telemetry::{Apid, TmPacket};
use crate::time::{Obt, TimeContext, Utc};

/// Smallest OBT accepted when read from the packet data.
pub const MIN_DATA_OBT: i64 = 2_000_000_000_000;
const OBT_LEN: usize = 6;
const UTC_LEN: usize = 26;

/// Housekeeping report service, its packets carry a SID.
const HK_REPORT_SERVICE: (u8, u8) = (3, 25);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Signed,
    Unsigned,
    Float,
    Double,
    Bool,
}

/// A parameter at a fixed position of the packet data field.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub offset: usize,
    pub bytes: usize,
    pub kind: ParamKind,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub comment: String,
}

impl ParamDef {
    fn column_kind(&self) -> Result<ColumnKind> {
        let kind = match (self.kind, self.bytes) {
            (ParamKind::Bool, 1..=8) => ColumnKind::Bool,
            (ParamKind::Signed, 1) => ColumnKind::Int8,
            (ParamKind::Signed, 2) => ColumnKind::Int16,
            (ParamKind::Signed, 3 | 4) => ColumnKind::Int32,
            (ParamKind::Signed, 5..=8) => ColumnKind::Int64,
            (ParamKind::Unsigned, 1) => ColumnKind::UInt8,
            (ParamKind::Unsigned, 2) => ColumnKind::UInt16,
            (ParamKind::Unsigned, 3 | 4) => ColumnKind::UInt32,
            (ParamKind::Unsigned, 5..=8) => ColumnKind::UInt64,
            (ParamKind::Float, 4) => ColumnKind::Float,
            (ParamKind::Double, 8) => ColumnKind::Double,
            (kind, bytes) => {
                return Err(Error::Hk(format!(
                    "parameter {} of kind {kind:?} can not have {bytes} bytes",
                    self.name
                )))
            }
        };
        Ok(kind)
    }

    fn column(&self) -> Result<Column> {
        Ok(Column::builder()
            .name(self.name.as_str())
            .kind(self.column_kind()?)
            .unit(self.unit.as_str())
            .comment(self.comment.as_str())
            .build())
    }

    fn zero(&self) -> Cell {
        match self.kind {
            ParamKind::Bool => Cell::Bool(false),
            ParamKind::Float | ParamKind::Double => Cell::Float(0.0),
            _ => Cell::Int(0),
        }
    }

    /// Decode the big-endian value from the packet data, 0 if the data is too
    /// short or the byte count is not in `1..=8`.
    #[must_use]
    pub fn decode(&self, data: &[u8]) -> Cell {
        if !(1..=8).contains(&self.bytes) {
            return self.zero();
        }
        let Some(raw) = self
            .offset
            .checked_add(self.bytes)
            .and_then(|end| data.get(self.offset..end))
        else {
            return self.zero();
        };
        let mut buf = [0u8; 8];
        buf[8 - raw.len()..].copy_from_slice(raw);
        let bits = u64::from_be_bytes(buf);
        match self.kind {
            ParamKind::Bool => Cell::Bool(bits != 0),
            ParamKind::Unsigned => Cell::UInt(bits),
            ParamKind::Signed => {
                let shift = 64 - 8 * self.bytes as u32;
                Cell::Int(((bits << shift) as i64) >> shift)
            }
            ParamKind::Float => Cell::Float(f64::from(f32::from_bits(bits as u32))),
            ParamKind::Double => Cell::Float(f64::from_bits(bits)),
        }
    }
}

/// Definition of one HK table and the packets it is filled from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HkTableDef {
    /// Structure name, used as `EXTNAME` and in the file name.
    pub name: String,
    pub apid: Apid,
    #[serde(default)]
    pub sid: u16,
    /// Offset of a 6 byte OBT in the packet data field that replaces the OBT
    /// of the packet header.
    #[serde(default)]
    pub obt_offset: Option<usize>,
    /// Written as `EXT_VER`.
    #[serde(default)]
    pub ext_version: String,
    pub columns: Vec<ParamDef>,
}

impl HkTableDef {
    /// # Errors
    /// Malformed JSON.
    pub fn from_json(s: &str) -> Result<Vec<Self>> {
        Ok(serde_json::from_str(s)?)
    }

    /// # Errors
    /// I/O failures or malformed JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// A HK table being filled packet by packet.
#[derive(Debug, Clone)]
pub struct HkPrwTable {
    def: HkTableDef,
    table: BinTable,
    current: Option<Obt>,
    first_utc: Option<Utc>,
}

impl HkPrwTable {
    /// # Errors
    /// A parameter with an unsupported kind and size.
    pub fn new(def: HkTableDef) -> Result<Self> {
        let mut columns = vec![
            Column::builder()
                .name("OBT_TIME")
                .kind(ColumnKind::Int64)
                .comment("on-board time")
                .build(),
            Column::builder()
                .name("UTC_TIME")
                .kind(ColumnKind::String)
                .repeat(UTC_LEN)
                .comment("UTC of OBT_TIME")
                .build(),
        ];
        for param in &def.columns {
            columns.push(param.column()?);
        }
        let mut table = BinTable::new(&def.name, columns)?;
        if !def.ext_version.is_empty() {
            table
                .header_mut()
                .set_with_comment("EXT_VER", def.ext_version.as_str(), "data structure version", "");
        }
        Ok(HkPrwTable {
            def,
            table,
            current: None,
            first_utc: None,
        })
    }

    #[must_use]
    pub fn def(&self) -> &HkTableDef {
        &self.def
    }

    #[must_use]
    pub fn table(&self) -> &BinTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut BinTable {
        &mut self.table
    }

    /// UTC of the first packet, if known.
    #[must_use]
    pub fn first_utc(&self) -> Option<&Utc> {
        self.first_utc.as_ref()
    }

    fn data_obt(&self, offset: usize, data: &[u8]) -> Result<Obt> {
        let raw = data.get(offset..offset + OBT_LEN).ok_or_else(|| {
            Error::Hk(format!(
                "packet data of {} bytes has no OBT at offset {offset} for HK Table {}",
                data.len(),
                self.def.name
            ))
        })?;
        let mut buf = [0u8; 8];
        buf[2..].copy_from_slice(raw);
        let obt = Obt::new(i64::from_be_bytes(buf));
        if obt.raw() < MIN_DATA_OBT {
            return Err(Error::Obt(format!(
                "The OBT of HK Table {} is {}, which is less than {MIN_DATA_OBT}",
                self.def.name,
                obt.raw()
            )));
        }
        Ok(obt)
    }

    /// Add a row for a packet. Returns false if the packet was discarded for
    /// having the same OBT as the previous one.
    ///
    /// The UTC is left empty when `time` has no correlation.
    ///
    /// # Errors
    /// An invalid or decreasing OBT, or a failed UTC conversion.
    pub fn add_packet(&mut self, obt: Obt, data: &[u8], time: &TimeContext) -> Result<bool> {
        let obt = match self.def.obt_offset {
            Some(offset) => self.data_obt(offset, data)?,
            None => obt,
        };
        if let Some(current) = self.current {
            if current == obt && self.def.obt_offset.is_some() {
                warn!(
                    "The OBT {obt} is identical as in previous TM packet for HK Table {}. Discarding this TM packet.",
                    self.def.name
                );
                return Ok(false);
            }
            if current >= obt {
                return Err(Error::Obt(format!(
                    "The OBT is decreasing from {} to {} for HK Table {}",
                    current.raw(),
                    obt.raw(),
                    self.def.name
                )));
            }
        }

        let utc = if time.correlation.is_empty() {
            None
        } else {
            Some(time.obt_to_utc(obt)?)
        };
        if self.current.is_none() {
            self.first_utc = utc;
        }
        self.current = Some(obt);

        let row = self.table.append_row();
        self.table.set(row, "OBT_TIME", obt.raw())?;
        self.table.set(
            row,
            "UTC_TIME",
            utc.map(|u| u.to_string()).unwrap_or_default(),
        )?;
        for param in &self.def.columns {
            self.table.set(row, &param.name, param.decode(data))?;
        }
        trace!(table = %self.def.name, row, obt = obt.raw(), "added HK row");
        Ok(true)
    }
}

/// `CH_[PR..._TG..._][PS..._]TU..._<struct>[-<data>]_V<version>.fits`
#[must_use]
pub fn product_file_name(
    utc: &Utc,
    visit: &VisitId,
    pass: &PassId,
    struct_name: &str,
    data_name: &str,
    version: u32,
) -> String {
    let mut name = String::from("CH_");
    if visit.is_valid() {
        name.push_str(&visit.file_name_pattern());
        name.push('_');
    }
    if pass.is_valid() {
        name.push_str(&pass.file_name_pattern());
        name.push('_');
    }
    name.push_str(&utc.file_name_pattern());
    name.push('_');
    name.push_str(struct_name);
    if data_name.is_empty() {
        name.push('_');
    } else {
        name.push('-');
        name.push_str(data_name);
        name.push('_');
    }
    name.push_str(&format!("V{version:04}.fits"));
    name
}

/// Write the visit keywords, and `PASS_ID` for a valid pass.
pub fn set_visit_keywords(header: &mut Header, visit: &VisitId, pass: &PassId) {
    header.set_with_comment("PROGTYPE", visit.program_type(), "program type", "");
    header.set_with_comment("PROG_ID", visit.program_id(), "program identifier", "");
    header.set_with_comment("REQ_ID", visit.request_id(), "request identifier", "");
    header.set_with_comment("VISITCTR", visit.visit_counter(), "visit counter", "");
    if pass.is_valid() {
        header.set_with_comment("PASS_ID", pass.to_string(), "pass identifier", "");
    }
}

/// Identification of a HK packet: APID and SID.
#[must_use]
pub fn packet_id(packet: &TmPacket) -> (Apid, u16) {
    let sid = match packet.service() {
        Some(hdr) if (hdr.service_type, hdr.service_subtype) == HK_REPORT_SERVICE => {
            let data = packet.data();
            if data.len() >= 2 {
                u16::from_be_bytes([data[0], data[1]])
            } else {
                0
            }
        }
        _ => 0,
    };
    (packet.header.apid, sid)
}

/// Counters of a [HkProcessor] run.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HkSummary {
    pub packets: usize,
    pub rows: usize,
    pub discarded: usize,
    /// Packets without table, by `(apid, sid)`.
    pub unknown: BTreeMap<String, usize>,
}

/// Routes HK packets to their tables and writes one file per table.
#[derive(Debug)]
pub struct HkProcessor {
    out_dir: PathBuf,
    visit: VisitId,
    pass: PassId,
    program: ProgramInfo,
    defs: BTreeMap<(Apid, u16), Vec<HkTableDef>>,
    tables: BTreeMap<(Apid, u16), Vec<HkPrwTable>>,
    summary: HkSummary,
}

impl HkProcessor {
    pub fn new<P: AsRef<Path>>(
        out_dir: P,
        defs: Vec<HkTableDef>,
        visit: VisitId,
        pass: PassId,
        program: ProgramInfo,
    ) -> Self {
        let mut by_id: BTreeMap<(Apid, u16), Vec<HkTableDef>> = BTreeMap::new();
        for def in defs {
            by_id.entry((def.apid, def.sid)).or_default().push(def);
        }
        HkProcessor {
            out_dir: out_dir.as_ref().to_path_buf(),
            visit,
            pass,
            program,
            defs: by_id,
            tables: BTreeMap::new(),
            summary: HkSummary::default(),
        }
    }

    #[must_use]
    pub fn is_known(&self, apid: Apid, sid: u16) -> bool {
        self.defs.contains_key(&(apid, sid))
    }

    #[must_use]
    pub fn summary(&self) -> &HkSummary {
        &self.summary
    }

    /// Add a packet to every table defined for its APID and SID. Packets
    /// without table are counted and skipped.
    ///
    /// # Errors
    /// See [HkPrwTable::add_packet].
    pub fn process(&mut self, packet: &TmPacket, time: &TimeContext) -> Result<()> {
        let id = packet_id(packet);
        let Some(defs) = self.defs.get(&id) else {
            trace!(apid = id.0, sid = id.1, "no HK table for packet");
            *self
                .summary
                .unknown
                .entry(format!("{}/{}", id.0, id.1))
                .or_default() += 1;
            return Ok(());
        };
        let obt = Obt::new(packet.service().map_or(0, |h| h.obt));
        if !self.tables.contains_key(&id) {
            let tables = defs
                .iter()
                .cloned()
                .map(HkPrwTable::new)
                .collect::<Result<Vec<_>>>()?;
            debug!(apid = id.0, sid = id.1, tables = tables.len(), "created HK tables");
            self.tables.insert(id, tables);
        }
        self.summary.packets += 1;
        for table in self.tables.get_mut(&id).into_iter().flatten() {
            if table.add_packet(obt, packet.data(), time)? {
                self.summary.rows += 1;
            } else {
                self.summary.discarded += 1;
            }
        }
        Ok(())
    }

    /// Write all tables, returns the file paths.
    ///
    /// # Errors
    /// A file can not be written.
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for table in self.tables.into_values().flatten() {
            let utc = table.first_utc().copied().unwrap_or_default();
            let name = product_file_name(
                &utc,
                &self.visit,
                &self.pass,
                &table.def().name,
                "",
                self.program.data_version(),
            );
            let path = self.out_dir.join(name);
            let mut hk = table.table().clone();
            let header = hk.header_mut();
            set_visit_keywords(header, &self.visit, &self.pass);
            header.set_program(&self.program);

            let mut file = FitsFile::create(&path);
            if let Some(primary) = file.hdu_mut(0) {
                set_visit_keywords(&mut primary.header, &self.visit, &self.pass);
                primary.header.set_program(&self.program);
            }
            hk.write_to(&mut file);
            file.save()?;
            info!(path = %path.display(), rows = hk.num_rows(), "wrote HK table");
            paths.push(path);
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    const DEFS: &str = r#"[
        {
            "name": "SCI_PRW_HkTest",
            "apid": 972,
            "sid": 1,
            "columns": [
                {"name": "SID", "offset": 0, "bytes": 2, "kind": "unsigned"},
                {"name": "TEMP", "offset": 2, "bytes": 2, "kind": "signed", "unit": "degC"},
                {"name": "VOLT", "offset": 4, "bytes": 4, "kind": "float"},
                {"name": "FAR", "offset": 100, "bytes": 1, "kind": "unsigned"}
            ]
        },
        {
            "name": "SCI_PRW_HkObt",
            "apid": 973,
            "obt_offset": 0,
            "columns": [
                {"name": "FLAG", "offset": 6, "bytes": 1, "kind": "bool"}
            ]
        }
    ]"#;

    fn defs() -> Vec<HkTableDef> {
        HkTableDef::from_json(DEFS).unwrap()
    }

    #[test_case(ParamKind::Signed, &[0xff, 0xfe], Cell::Int(-2); "signed short")]
    #[test_case(ParamKind::Signed, &[0x80, 0x00, 0x00], Cell::Int(-8_388_608); "signed 24 bit")]
    #[test_case(ParamKind::Unsigned, &[0xff, 0xfe], Cell::UInt(65534); "unsigned")]
    #[test_case(ParamKind::Float, &[0x3f, 0xc0, 0x00, 0x00], Cell::Float(1.5); "float")]
    #[test_case(ParamKind::Bool, &[0x02], Cell::Bool(true); "bool")]
    fn decode_param(kind: ParamKind, data: &[u8], expected: Cell) {
        let param = ParamDef {
            name: "P".to_string(),
            offset: 0,
            bytes: data.len(),
            kind,
            unit: String::new(),
            comment: String::new(),
        };
        assert_eq!(param.decode(data), expected);
    }

    #[test]
    fn decode_beyond_data_is_zero() {
        let param = &defs()[0].columns[3];
        assert_eq!(param.decode(&[1, 2, 3]), Cell::Int(0));
    }

    #[test_case(0, 0, ParamKind::Signed; "zero bytes signed")]
    #[test_case(0, 9, ParamKind::Unsigned; "nine bytes")]
    #[test_case(usize::MAX, 2, ParamKind::Unsigned; "offset overflow")]
    fn decode_bad_layout_is_zero(offset: usize, bytes: usize, kind: ParamKind) {
        let param = ParamDef {
            name: "P".to_string(),
            offset,
            bytes,
            kind,
            unit: String::new(),
            comment: String::new(),
        };
        assert_eq!(param.decode(&[0xff; 16]), Cell::Int(0));
    }

    #[test]
    fn table_rows() {
        let mut table = HkPrwTable::new(defs().remove(0)).unwrap();
        let ctx = TimeContext::default();
        #[rustfmt::skip]
        let data = [0x00, 0x01, 0xff, 0xf6, 0x3f, 0xc0, 0x00, 0x00];
        assert!(table.add_packet(Obt::new(100), &data, &ctx).unwrap());
        assert!(table.add_packet(Obt::new(200), &data, &ctx).unwrap());

        let t = table.table();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.get::<i64>(1, "OBT_TIME").unwrap(), 200);
        assert_eq!(t.get::<String>(0, "UTC_TIME").unwrap(), "");
        assert_eq!(t.get::<i16>(0, "TEMP").unwrap(), -10);
        assert_eq!(t.get::<f32>(0, "VOLT").unwrap(), 1.5);
        assert_eq!(t.get::<u8>(0, "FAR").unwrap(), 0);
        assert_eq!(t.column("TEMP").unwrap().unit, "degC");

        let err = table.add_packet(Obt::new(150), &data, &ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The OBT is decreasing from 200 to 150 for HK Table SCI_PRW_HkTest"
        );
    }

    #[test]
    fn obt_differing_in_sync_bit_is_not_increasing() {
        let mut table = HkPrwTable::new(defs().remove(0)).unwrap();
        let ctx = TimeContext::default();
        let data = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(table.add_packet(Obt::new(100), &data, &ctx).unwrap());

        let err = table.add_packet(Obt::new(101), &data, &ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The OBT is decreasing from 100 to 101 for HK Table SCI_PRW_HkTest"
        );
        assert_eq!(table.table().num_rows(), 1);
    }

    #[test]
    fn obt_from_packet_data() {
        let mut table = HkPrwTable::new(defs().remove(1)).unwrap();
        let ctx = TimeContext::default();
        let obt: i64 = 3_000_000_000_000;
        let mut data = obt.to_be_bytes()[2..].to_vec();
        data.push(1);

        assert!(table.add_packet(Obt::new(5), &data, &ctx).unwrap());
        // same OBT is discarded
        assert!(!table.add_packet(Obt::new(6), &data, &ctx).unwrap());
        assert_eq!(table.table().num_rows(), 1);
        assert_eq!(table.table().get::<i64>(0, "OBT_TIME").unwrap(), obt);
        assert!(table.table().get::<bool>(0, "FLAG").unwrap());

        let low = 1_000_i64.to_be_bytes()[2..].to_vec();
        let err = table.add_packet(Obt::new(5), &low, &ctx).unwrap_err();
        assert!(err.to_string().contains("which is less than 2000000000000"));
    }

    #[test]
    fn file_names() {
        let utc: Utc = "2020-03-04T05:06:07".parse().unwrap();
        let visit = VisitId::new(13, 1, 2, 3).unwrap();
        let pass: PassId = "PS20030405".parse().unwrap();
        assert_eq!(
            product_file_name(&utc, &visit, &pass, "SCI_PRW_HkDefault", "", 102),
            "CH_PR130001_TG000203_PS20030405_TU2020-03-04T05-06-07_SCI_PRW_HkDefault_V0102.fits"
        );
        assert_eq!(
            product_file_name(&utc, &VisitId::default(), &PassId::default(), "X", "data", 1),
            "CH_TU2020-03-04T05-06-07_X-data_V0001.fits"
        );
    }
}
