use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::trace;
use typed_builder::TypedBuilder;

use super::{FitsError, FitsFile, FitsPath, Hdu, HduKind, Header};

/// Column data types. Unsigned 16..64 bit and signed 8 bit integers are
/// stored with a `TZERO` offset.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// `L`
    Bool,
    /// `S`, stored as `B` with `TZERO = -128`
    Int8,
    /// `B`
    UInt8,
    /// `I`
    Int16,
    /// `U`, stored as `I` with `TZERO = 32768`
    UInt16,
    /// `J`
    Int32,
    /// `V`, stored as `J` with `TZERO = 2^31`
    UInt32,
    /// `K`
    Int64,
    /// `W`, stored as `K` with `TZERO = 2^63`
    UInt64,
    /// `E`
    Float,
    /// `D`
    Double,
    /// `A`, the repeat count is the string width
    String,
}

impl ColumnKind {
    /// Bytes per element.
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            ColumnKind::Bool | ColumnKind::Int8 | ColumnKind::UInt8 | ColumnKind::String => 1,
            ColumnKind::Int16 | ColumnKind::UInt16 => 2,
            ColumnKind::Int32 | ColumnKind::UInt32 | ColumnKind::Float => 4,
            ColumnKind::Int64 | ColumnKind::UInt64 | ColumnKind::Double => 8,
        }
    }

    fn tform_code(self) -> char {
        match self {
            ColumnKind::Bool => 'L',
            ColumnKind::Int8 | ColumnKind::UInt8 => 'B',
            ColumnKind::Int16 | ColumnKind::UInt16 => 'I',
            ColumnKind::Int32 | ColumnKind::UInt32 => 'J',
            ColumnKind::Int64 | ColumnKind::UInt64 => 'K',
            ColumnKind::Float => 'E',
            ColumnKind::Double => 'D',
            ColumnKind::String => 'A',
        }
    }

    fn zero(self) -> i128 {
        match self {
            ColumnKind::Int8 => -128,
            ColumnKind::UInt16 => 1 << 15,
            ColumnKind::UInt32 => 1 << 31,
            ColumnKind::UInt64 => 1 << 63,
            _ => 0,
        }
    }

    fn range(self) -> (i128, i128) {
        match self {
            ColumnKind::Int8 => (i128::from(i8::MIN), i128::from(i8::MAX)),
            ColumnKind::UInt8 => (0, i128::from(u8::MAX)),
            ColumnKind::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
            ColumnKind::UInt16 => (0, i128::from(u16::MAX)),
            ColumnKind::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            ColumnKind::UInt32 => (0, i128::from(u32::MAX)),
            ColumnKind::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
            ColumnKind::UInt64 => (0, i128::from(u64::MAX)),
            _ => (i128::MIN, i128::MAX),
        }
    }

    fn is_integer(self) -> bool {
        !matches!(
            self,
            ColumnKind::Bool | ColumnKind::Float | ColumnKind::Double | ColumnKind::String
        )
    }

    fn from_tform(code: char, zero: Option<f64>) -> Option<Self> {
        let zero = zero.unwrap_or(0.0);
        let kind = match (code, zero) {
            ('L', _) => ColumnKind::Bool,
            ('B', z) if z == -128.0 => ColumnKind::Int8,
            ('B', _) => ColumnKind::UInt8,
            ('I', z) if z == 32768.0 => ColumnKind::UInt16,
            ('I', _) => ColumnKind::Int16,
            ('J', z) if z == 2_147_483_648.0 => ColumnKind::UInt32,
            ('J', _) => ColumnKind::Int32,
            ('K', z) if z == 9_223_372_036_854_775_808.0 => ColumnKind::UInt64,
            ('K', _) => ColumnKind::Int64,
            ('E', _) => ColumnKind::Float,
            ('D', _) => ColumnKind::Double,
            ('A', _) => ColumnKind::String,
            _ => return None,
        };
        Some(kind)
    }
}

/// A binary table column.
///
/// ```
/// use cheops::fits::{Column, ColumnKind};
///
/// let col = Column::builder()
///     .name("TEMP")
///     .kind(ColumnKind::Float)
///     .unit("degC")
///     .build();
/// assert_eq!(col.repeat, 1);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TypedBuilder)]
pub struct Column {
    #[builder(setter(into))]
    pub name: String,
    pub kind: ColumnKind,
    /// Number of elements, the width for strings.
    #[builder(default = 1)]
    pub repeat: usize,
    #[builder(default, setter(into))]
    pub unit: String,
    /// Stored value marking an undefined integer (`TNULLn`).
    #[builder(default, setter(strip_option))]
    pub null: Option<i64>,
    #[builder(default, setter(into))]
    pub comment: String,
}

impl Column {
    fn byte_len(&self) -> usize {
        self.kind.width() * self.repeat
    }

    fn elements(&self) -> usize {
        if self.kind == ColumnKind::String {
            1
        } else {
            self.repeat
        }
    }
}

/// A cell value.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Cell {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Array(Vec<Cell>),
}

macro_rules! cell_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Cell {
            fn from(v: $t) -> Self {
                Cell::Int(i64::from(v))
            }
        })*
    };
}
cell_from_int!(i8, u8, i16, u16, i32, u32, i64);

impl From<u64> for Cell {
    fn from(v: u64) -> Self {
        Cell::UInt(v)
    }
}
impl From<bool> for Cell {
    fn from(v: bool) -> Self {
        Cell::Bool(v)
    }
}
impl From<f32> for Cell {
    fn from(v: f32) -> Self {
        Cell::Float(f64::from(v))
    }
}
impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}
impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Str(v.to_string())
    }
}
impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Str(v)
    }
}
impl<T: Into<Cell>> From<Vec<T>> for Cell {
    fn from(v: Vec<T>) -> Self {
        Cell::Array(v.into_iter().map(Into::into).collect())
    }
}

impl Cell {
    fn as_i128(&self) -> Option<i128> {
        match self {
            Cell::Bool(v) => Some(i128::from(*v)),
            Cell::Int(v) => Some(i128::from(*v)),
            Cell::UInt(v) => Some(i128::from(*v)),
            Cell::Float(v) if v.is_finite() => Some(v.round() as i128),
            Cell::Str(v) => v.trim().parse().ok(),
            Cell::Array(v) if v.len() == 1 => v[0].as_i128(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Bool(v) => Some(f64::from(u8::from(*v))),
            Cell::Int(v) => Some(*v as f64),
            Cell::UInt(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Str(v) => v.trim().parse().ok(),
            Cell::Array(v) if v.len() == 1 => v[0].as_f64(),
            Cell::Array(_) => None,
        }
    }
}

/// Conversion of a cell to a Rust type. The `Default` value is returned for
/// columns that do not exist.
pub trait FromCell: Sized + Default {
    fn from_cell(cell: &Cell) -> Option<Self>;
}

impl FromCell for bool {
    fn from_cell(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Bool(v) => Some(*v),
            other => other.as_i128().map(|v| v != 0),
        }
    }
}

macro_rules! int_from_cell {
    ($($t:ty),*) => {
        $(impl FromCell for $t {
            fn from_cell(cell: &Cell) -> Option<Self> {
                cell.as_i128().and_then(|v| <$t>::try_from(v).ok())
            }
        })*
    };
}
int_from_cell!(i8, u8, i16, u16, i32, u32, i64, u64);

impl FromCell for f64 {
    fn from_cell(cell: &Cell) -> Option<Self> {
        cell.as_f64()
    }
}

impl FromCell for f32 {
    fn from_cell(cell: &Cell) -> Option<Self> {
        cell.as_f64().map(|v| v as f32)
    }
}

impl FromCell for String {
    fn from_cell(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Str(v) => Some(v.clone()),
            Cell::Bool(v) => Some(if *v { "T" } else { "F" }.to_string()),
            Cell::Int(v) => Some(v.to_string()),
            Cell::UInt(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Array(_) => None,
        }
    }
}

impl<T: FromCell> FromCell for Vec<T> {
    fn from_cell(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Array(v) => v.iter().map(T::from_cell).collect(),
            other => T::from_cell(other).map(|v| vec![v]),
        }
    }
}

fn decode(kind: ColumnKind, raw: &[u8]) -> Cell {
    let int = |n: usize| {
        let mut buf = [0u8; 8];
        buf[8 - n..].copy_from_slice(&raw[..n]);
        // sign extend
        let shift = 64 - 8 * n as u32;
        (i64::from_be_bytes(buf) << shift) >> shift
    };
    match kind {
        ColumnKind::Bool => Cell::Bool(raw[0] == b'T'),
        ColumnKind::UInt8 => Cell::Int(i64::from(raw[0])),
        ColumnKind::Int8 => Cell::Int(i64::from(raw[0]) - 128),
        ColumnKind::Int16 | ColumnKind::Int32 | ColumnKind::Int64 => {
            Cell::Int(int(kind.width()))
        }
        ColumnKind::UInt16 | ColumnKind::UInt32 => {
            Cell::Int(int(kind.width()) + kind.zero() as i64)
        }
        ColumnKind::UInt64 => Cell::UInt((int(8) as u64) ^ (1 << 63)),
        ColumnKind::Float => Cell::Float(f64::from(f32::from_be_bytes([
            raw[0], raw[1], raw[2], raw[3],
        ]))),
        ColumnKind::Double => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&raw[..8]);
            Cell::Float(f64::from_be_bytes(buf))
        }
        ColumnKind::String => Cell::Str(
            String::from_utf8_lossy(raw)
                .trim_end_matches(['\0', ' '])
                .to_string(),
        ),
    }
}

/// Stored integer value before applying `TZERO`.
fn stored_int(kind: ColumnKind, raw: &[u8]) -> Option<i64> {
    if !kind.is_integer() {
        return None;
    }
    if kind == ColumnKind::UInt8 || kind == ColumnKind::Int8 {
        return Some(i64::from(raw[0]));
    }
    let n = kind.width();
    let mut buf = [0u8; 8];
    buf[8 - n..].copy_from_slice(&raw[..n]);
    let shift = 64 - 8 * n as u32;
    Some((i64::from_be_bytes(buf) << shift) >> shift)
}

fn encode(column: &Column, cell: &Cell, out: &mut [u8]) -> Result<(), FitsError> {
    let invalid = |msg: String| FitsError::InvalidColumn {
        column: column.name.clone(),
        msg,
    };
    let kind = column.kind;
    match kind {
        ColumnKind::Bool => {
            let v = bool::from_cell(cell)
                .ok_or_else(|| invalid(format!("{cell:?} is not a logical")))?;
            out[0] = if v { b'T' } else { b'F' };
        }
        ColumnKind::Float | ColumnKind::Double => {
            let v = cell
                .as_f64()
                .ok_or_else(|| invalid(format!("{cell:?} is not a number")))?;
            if kind == ColumnKind::Float {
                out.copy_from_slice(&(v as f32).to_be_bytes());
            } else {
                out.copy_from_slice(&v.to_be_bytes());
            }
        }
        ColumnKind::String => {
            let v = String::from_cell(cell)
                .ok_or_else(|| invalid(format!("{cell:?} is not a string")))?;
            out.fill(b' ');
            let mut len = v.len().min(out.len());
            while !v.is_char_boundary(len) {
                len -= 1;
            }
            out[..len].copy_from_slice(&v.as_bytes()[..len]);
        }
        _ => {
            let v = cell
                .as_i128()
                .ok_or_else(|| invalid(format!("{cell:?} is not an integer")))?;
            let (min, max) = kind.range();
            if v < min || v > max {
                return Err(invalid(format!("value {v} out of range {min}..={max}")));
            }
            let stored = (v - kind.zero()) as i64;
            let n = kind.width();
            out.copy_from_slice(&stored.to_be_bytes()[8 - n..]);
        }
    }
    Ok(())
}

fn parse_tform(column: &str, tform: &str) -> Result<(usize, char), FitsError> {
    let tform = tform.trim();
    let digits = tform.chars().take_while(char::is_ascii_digit).count();
    let repeat = if digits == 0 {
        1
    } else {
        tform[..digits].parse().map_err(|_| FitsError::InvalidColumn {
            column: column.to_string(),
            msg: format!("invalid TFORM {tform}"),
        })?
    };
    let code = tform[digits..].chars().next().ok_or_else(|| FitsError::InvalidColumn {
        column: column.to_string(),
        msg: format!("invalid TFORM {tform}"),
    })?;
    Ok((repeat, code))
}

/// A FITS binary table held in memory, rows stored as raw FITS bytes.
#[derive(Debug, Clone)]
pub struct BinTable {
    header: Header,
    columns: Vec<Column>,
    offsets: Vec<usize>,
    row_len: usize,
    data: Vec<u8>,
    cursor: usize,
}

impl BinTable {
    /// New empty table.
    ///
    /// # Errors
    /// Duplicate column names or a column of zero width.
    pub fn new(extname: &str, columns: Vec<Column>) -> Result<Self, FitsError> {
        let mut header = Header::default();
        header.set_with_comment("XTENSION", "BINTABLE", "binary table extension", "");
        header.set_with_comment("BITPIX", 8, "array data type", "");
        header.set_with_comment("NAXIS", 2, "number of array dimensions", "");
        header.set("NAXIS1", 0);
        header.set("NAXIS2", 0);
        header.set_with_comment("PCOUNT", 0, "number of group parameters", "");
        header.set_with_comment("GCOUNT", 1, "number of groups", "");
        header.set_with_comment("TFIELDS", columns.len() as u32, "number of table fields", "");
        for (idx, col) in columns.iter().enumerate() {
            let n = idx + 1;
            if col.repeat == 0 {
                return Err(FitsError::InvalidColumn {
                    column: col.name.clone(),
                    msg: "repeat count must not be 0".to_string(),
                });
            }
            if columns[..idx].iter().any(|c| c.name == col.name) {
                return Err(FitsError::InvalidColumn {
                    column: col.name.clone(),
                    msg: "duplicate column".to_string(),
                });
            }
            header.set_with_comment(&format!("TTYPE{n}"), col.name.as_str(), &col.comment, "");
            header.set(
                &format!("TFORM{n}"),
                format!("{}{}", col.repeat, col.kind.tform_code()),
            );
            if !col.unit.is_empty() {
                header.set(&format!("TUNIT{n}"), col.unit.as_str());
            }
            if let Some(null) = col.null {
                header.set(&format!("TNULL{n}"), null);
            }
            match col.kind.zero() {
                0 => {}
                z => match i64::try_from(z) {
                    Ok(z) => header.set(&format!("TZERO{n}"), z),
                    Err(_) => header.set(&format!("TZERO{n}"), z as f64),
                },
            }
        }
        header.set_with_comment("EXTNAME", extname, "extension name", "");
        Self::with_header(header, columns, Vec::new())
    }

    fn with_header(
        mut header: Header,
        columns: Vec<Column>,
        data: Vec<u8>,
    ) -> Result<Self, FitsError> {
        let mut offsets = Vec::with_capacity(columns.len());
        let mut row_len = 0;
        for col in &columns {
            offsets.push(row_len);
            row_len += col.byte_len();
        }
        header.set("NAXIS1", row_len as i64);
        let rows = if row_len == 0 { 0 } else { data.len() / row_len };
        header.set("NAXIS2", rows as i64);
        Ok(BinTable {
            header,
            columns,
            offsets,
            row_len,
            data,
            cursor: 0,
        })
    }

    /// Table from a `BINTABLE` HDU.
    ///
    /// # Errors
    /// The HDU is not a binary table or has unsupported columns.
    pub fn from_hdu(hdu: &Hdu) -> Result<Self, FitsError> {
        if hdu.kind() != HduKind::BinTable {
            return Err(FitsError::Unsupported(format!(
                "HDU {} is not a binary table",
                hdu.name()
            )));
        }
        let header = &hdu.header;
        let fields: u32 = header.get("TFIELDS")?;
        let mut columns = Vec::with_capacity(fields as usize);
        for n in 1..=fields {
            let name: String = header.get(&format!("TTYPE{n}"))?;
            let tform: String = header.get(&format!("TFORM{n}"))?;
            let (repeat, code) = parse_tform(&name, &tform)?;
            let zero = header.get_opt::<f64>(&format!("TZERO{n}"));
            let kind = ColumnKind::from_tform(code, zero).ok_or_else(|| {
                FitsError::Unsupported(format!("column {name} with TFORM {tform}"))
            })?;
            columns.push(Column {
                comment: header
                    .comment(&format!("TTYPE{n}"))
                    .unwrap_or_default()
                    .to_string(),
                unit: header
                    .get_opt::<String>(&format!("TUNIT{n}"))
                    .unwrap_or_default(),
                null: header.get_opt::<i64>(&format!("TNULL{n}")),
                name,
                kind,
                repeat,
            });
        }
        let row_len: usize = columns.iter().map(Column::byte_len).sum();
        let naxis1: usize = header.get::<u32>("NAXIS1")? as usize;
        if naxis1 != row_len {
            return Err(FitsError::Unsupported(format!(
                "row length {naxis1} of {} does not match its columns ({row_len})",
                hdu.name()
            )));
        }
        let rows: usize = header.get::<u32>("NAXIS2")? as usize;
        let data = hdu.data[..(rows * row_len).min(hdu.data.len())].to_vec();
        trace!(extname = %hdu.name(), rows, "read binary table");
        Self::with_header(header.clone(), columns, data)
    }

    /// Open a table. `path` may select the extension with `[EXTNAME]`,
    /// otherwise the first binary table is used.
    ///
    /// # Errors
    /// See [FitsFile::open] and [BinTable::from_hdu].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FitsError> {
        let fits_path = FitsPath::parse(path);
        let file = FitsFile::open(&fits_path.file)?;
        let idx = file.select(fits_path.extension.as_deref(), HduKind::BinTable)?;
        Self::from_hdu(&file.hdus()[idx])
    }

    /// HDU with the current rows.
    #[must_use]
    pub fn to_hdu(&self) -> Hdu {
        let mut header = self.header.clone();
        header.set("NAXIS2", self.num_rows() as i64);
        Hdu {
            header,
            data: self.data.clone(),
        }
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    #[must_use]
    pub fn extname(&self) -> String {
        self.header.name()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        if self.row_len == 0 {
            0
        } else {
            self.data.len() / self.row_len
        }
    }

    /// Append a row with every cell undefined, returns its index.
    pub fn append_row(&mut self) -> usize {
        let row = self.num_rows();
        self.data.resize(self.data.len() + self.row_len, 0);
        let start = row * self.row_len;
        for (col, offset) in self.columns.iter().zip(&self.offsets) {
            let cell = &mut self.data[start + offset..start + offset + col.byte_len()];
            match col.kind {
                ColumnKind::Float => {
                    for v in cell.chunks_exact_mut(4) {
                        v.copy_from_slice(&f32::NAN.to_be_bytes());
                    }
                }
                ColumnKind::Double => {
                    for v in cell.chunks_exact_mut(8) {
                        v.copy_from_slice(&f64::NAN.to_be_bytes());
                    }
                }
                ColumnKind::String => cell.fill(b' '),
                kind if kind.is_integer() => {
                    // stored value of the null marker, or of a physical 0
                    let stored = col.null.unwrap_or((kind.zero() as i64).wrapping_neg());
                    let n = kind.width();
                    for v in cell.chunks_exact_mut(n) {
                        v.copy_from_slice(&stored.to_be_bytes()[8 - n..]);
                    }
                }
                _ => {}
            }
        }
        row
    }

    fn cell_bytes(&self, row: usize, col: usize) -> Result<&[u8], FitsError> {
        let rows = self.num_rows();
        if row >= rows {
            return Err(FitsError::RowOutOfRange { row, rows });
        }
        let start = row * self.row_len + self.offsets[col];
        Ok(&self.data[start..start + self.columns[col].byte_len()])
    }

    /// Raw cell value.
    ///
    /// # Errors
    /// Unknown column or row out of range.
    pub fn cell(&self, row: usize, name: &str) -> Result<Cell, FitsError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| FitsError::NoSuchColumn(name.to_string()))?;
        let raw = self.cell_bytes(row, col)?;
        let column = &self.columns[col];
        let width = column.kind.width();
        if column.elements() == 1 {
            Ok(decode(column.kind, raw))
        } else {
            Ok(Cell::Array(
                raw.chunks_exact(width).map(|v| decode(column.kind, v)).collect(),
            ))
        }
    }

    /// Typed cell value, the type default for a column that does not exist.
    ///
    /// # Errors
    /// Row out of range or a value not convertible to `T`.
    pub fn get<T: FromCell>(&self, row: usize, name: &str) -> Result<T, FitsError> {
        if !self.has_column(name) {
            return Ok(T::default());
        }
        let cell = self.cell(row, name)?;
        T::from_cell(&cell).ok_or_else(|| FitsError::InvalidColumn {
            column: name.to_string(),
            msg: format!(
                "can not convert {cell:?} to {}",
                std::any::type_name::<T>()
            ),
        })
    }

    /// Like [BinTable::get] but `None` for undefined cells and missing
    /// columns.
    ///
    /// # Errors
    /// Row out of range or a value not convertible to `T`.
    pub fn get_opt<T: FromCell>(&self, row: usize, name: &str) -> Result<Option<T>, FitsError> {
        if !self.has_column(name) || self.is_null(row, name)? {
            return Ok(None);
        }
        self.get(row, name).map(Some)
    }

    /// Whether a cell (all elements of a vector cell) is undefined: `TNULLn`
    /// for integers, NaN for floats, neither `T` nor `F` for logicals.
    ///
    /// # Errors
    /// Unknown column or row out of range.
    pub fn is_null(&self, row: usize, name: &str) -> Result<bool, FitsError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| FitsError::NoSuchColumn(name.to_string()))?;
        let raw = self.cell_bytes(row, col)?;
        let column = &self.columns[col];
        let width = column.kind.width();
        let null = match column.kind {
            ColumnKind::Bool => raw.iter().all(|&b| b != b'T' && b != b'F'),
            ColumnKind::String => false,
            ColumnKind::Float | ColumnKind::Double => raw
                .chunks_exact(width)
                .all(|v| matches!(decode(column.kind, v), Cell::Float(f) if f.is_nan())),
            kind => match column.null {
                Some(null) => raw
                    .chunks_exact(width)
                    .all(|v| stored_int(kind, v) == Some(null)),
                None => false,
            },
        };
        Ok(null)
    }

    /// Set a cell. Vector cells take a [Cell::Array] of at most `repeat`
    /// values, missing trailing elements become zero.
    ///
    /// # Errors
    /// Unknown column, row out of range or a value not representable in the
    /// column type.
    pub fn set<V: Into<Cell>>(&mut self, row: usize, name: &str, value: V) -> Result<(), FitsError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| FitsError::NoSuchColumn(name.to_string()))?;
        let rows = self.num_rows();
        if row >= rows {
            return Err(FitsError::RowOutOfRange { row, rows });
        }
        let column = &self.columns[col];
        let start = row * self.row_len + self.offsets[col];
        let out = &mut self.data[start..start + column.byte_len()];
        let cell = value.into();
        if column.elements() == 1 {
            return encode(column, &cell, out);
        }
        let values = match cell {
            Cell::Array(values) => values,
            other => vec![other],
        };
        if values.len() > column.repeat {
            return Err(FitsError::InvalidColumn {
                column: column.name.clone(),
                msg: format!("{} values for {} elements", values.len(), column.repeat),
            });
        }
        out.fill(0);
        let width = column.kind.width();
        for (value, slot) in values.iter().zip(out.chunks_exact_mut(width)) {
            encode(column, value, slot)?;
        }
        Ok(())
    }

    /// Mark a cell as undefined.
    ///
    /// # Errors
    /// Unknown column, row out of range, or an integer column without
    /// `TNULLn`.
    pub fn set_null(&mut self, row: usize, name: &str) -> Result<(), FitsError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| FitsError::NoSuchColumn(name.to_string()))?;
        let column = self.columns[col].clone();
        let value = match column.kind {
            ColumnKind::Float | ColumnKind::Double => Cell::Float(f64::NAN),
            ColumnKind::String => Cell::Str(String::new()),
            ColumnKind::Bool => {
                let rows = self.num_rows();
                if row >= rows {
                    return Err(FitsError::RowOutOfRange { row, rows });
                }
                let start = row * self.row_len + self.offsets[col];
                self.data[start..start + column.byte_len()].fill(0);
                return Ok(());
            }
            kind => {
                let null = column.null.ok_or_else(|| FitsError::InvalidColumn {
                    column: column.name.clone(),
                    msg: "no TNULL defined".to_string(),
                })?;
                let physical = i128::from(null) + kind.zero();
                match i64::try_from(physical) {
                    Ok(v) => Cell::Int(v),
                    Err(_) => Cell::UInt(physical as u64),
                }
            }
        };
        let value = if column.elements() > 1 {
            Cell::Array(vec![value; column.repeat])
        } else {
            value
        };
        self.set(row, name, value)
    }

    /// Rows in order.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.num_rows()).map(move |row| RowRef { table: self, row })
    }

    /// Sequential reading: index of the next row, `None` after the last one.
    pub fn read_row(&mut self) -> Option<usize> {
        if self.cursor >= self.num_rows() {
            return None;
        }
        self.cursor += 1;
        Some(self.cursor - 1)
    }

    /// Restart sequential reading at the first row.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Append this table to `file`, or replace the extension of the same name.
    pub fn write_to(&self, file: &mut FitsFile) -> usize {
        let hdu = self.to_hdu();
        match file.find(&self.extname()) {
            Some(idx) => {
                if let Some(existing) = file.hdu_mut(idx) {
                    *existing = hdu;
                }
                idx
            }
            None => file.append(hdu),
        }
    }
}

/// One row of a [BinTable].
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a BinTable,
    row: usize,
}

impl RowRef<'_> {
    #[must_use]
    pub fn index(&self) -> usize {
        self.row
    }

    /// # Errors
    /// See [BinTable::get].
    pub fn get<T: FromCell>(&self, name: &str) -> Result<T, FitsError> {
        self.table.get(self.row, name)
    }

    /// # Errors
    /// See [BinTable::is_null].
    pub fn is_null(&self, name: &str) -> Result<bool, FitsError> {
        self.table.is_null(self.row, name)
    }

    /// # Errors
    /// See [BinTable::cell].
    pub fn cell(&self, name: &str) -> Result<Cell, FitsError> {
        self.table.cell(self.row, name)
    }
}
