//! Reading and writing the subset of FITS used by CHEOPS products: headers
//! with checksums, binary tables and images.
//!
//! Paths may select an extension by name, e.g. `file.fits[SCI_RAW_HkCentroid]`.
mod checksum;
mod file;
mod header;
mod image;
mod table;

use std::path::{Path, PathBuf};

pub use checksum::{checksum_encode, ones_complement_sum};
pub use file::{FitsFile, Hdu, HduKind};
pub use header::{Card, FromValue, Header, ProgramInfo, Value};
pub use image::{Image, Pixel};
pub use table::{BinTable, Cell, Column, ColumnKind, FromCell, RowRef};

/// FITS block size, headers and data are padded to a multiple of it.
pub const BLOCK_LEN: usize = 2880;
/// Header card length.
pub const CARD_LEN: usize = 80;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum FitsError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Keyword {keyword} does not exist in header of {hdu}")]
    MissingKeyword { keyword: String, hdu: String },
    #[error("keyword {keyword}: {msg}")]
    InvalidKeyword { keyword: String, msg: String },
    #[error("invalid header card {0:?}")]
    InvalidCard(String),
    #[error("Checksum of HDU {hdu} is wrong. See keyword{keywords}")]
    Checksum { hdu: String, keywords: String },
    #[error("no extension {name} in {path}")]
    NoSuchExtension { name: String, path: PathBuf },
    #[error("column {0} does not exist")]
    NoSuchColumn(String),
    #[error("column {column}: {msg}")]
    InvalidColumn { column: String, msg: String },
    #[error("row {row} out of range, table has {rows} rows")]
    RowOutOfRange { row: usize, rows: usize },
    #[error("index {index:?} out of range for shape {shape:?}")]
    IndexOutOfRange { index: Vec<usize>, shape: Vec<usize> },
    #[error("{0}")]
    Unsupported(String),
    #[error("truncated FITS data: {0}")]
    Truncated(String),
}

/// A file path with an optional `[EXTNAME]` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitsPath {
    pub file: PathBuf,
    pub extension: Option<String>,
}

impl FitsPath {
    #[must_use]
    pub fn parse<P: AsRef<Path>>(path: P) -> Self {
        let s = path.as_ref().to_string_lossy();
        if let (Some(open), true) = (s.rfind('['), s.ends_with(']')) {
            return FitsPath {
                file: PathBuf::from(&s[..open]),
                extension: Some(s[open + 1..s.len() - 1].to_string()),
            };
        }
        FitsPath {
            file: path.as_ref().to_path_buf(),
            extension: None,
        }
    }
}
