//! Selection of the reference file valid for a point in time.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fits::{FitsFile, FitsPath, HduKind, Header};
use crate::time::Utc;

/// Validity period and version of one reference file.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidityPeriod {
    pub start: Utc,
    pub stop: Utc,
    pub arch_rev: i32,
    pub proc_num: i32,
    /// Path as given, including an `[EXTNAME]` suffix.
    pub path: PathBuf,
}

impl ValidityPeriod {
    /// Start and stop are inclusive.
    #[must_use]
    pub fn contains(&self, utc: &Utc) -> bool {
        self.start <= *utc && *utc <= self.stop
    }

    fn from_header(header: &Header, path: &Path) -> Result<Self> {
        Ok(ValidityPeriod {
            start: header.get::<String>("V_STRT_U")?.parse()?,
            stop: header.get::<String>("V_STOP_U")?.parse()?,
            arch_rev: header.get("ARCH_REV")?,
            proc_num: header.get("PROC_NUM")?,
            path: path.to_path_buf(),
        })
    }
}

/// A set of reference files of one type, ordered by `(ARCH_REV, PROC_NUM)`.
#[derive(Debug, Clone)]
pub struct ValidRefFile {
    extname: String,
    periods: BTreeMap<(i32, i32), ValidityPeriod>,
}

impl ValidRefFile {
    /// Read the validity keywords of every file. Without an `[EXTNAME]`
    /// suffix the first extension is used.
    ///
    /// # Errors
    /// A file can not be read, files have different `EXTNAME`s, or two files
    /// share `ARCH_REV` and `PROC_NUM`.
    pub fn open<P: AsRef<Path>>(files: &[P]) -> Result<Self> {
        let mut extname: Option<String> = None;
        let mut periods: BTreeMap<(i32, i32), ValidityPeriod> = BTreeMap::new();
        for path in files {
            let path = path.as_ref();
            let fits_path = FitsPath::parse(path);
            let file = FitsFile::open(&fits_path.file)?;
            let idx = match fits_path.extension.as_deref() {
                Some(name) => file.select(Some(name), HduKind::BinTable)?,
                None => usize::from(file.hdus().len() > 1),
            };
            let header = &file.hdus()[idx].header;
            let name: String = header.get("EXTNAME")?;
            match &extname {
                Some(first) if *first != name => {
                    return Err(Error::ReferenceFile(format!(
                        "Found reference files of different types: [{first}], [{name}]"
                    )));
                }
                _ => extname = Some(name.clone()),
            }

            let period = ValidityPeriod::from_header(header, path)?;
            let key = (period.arch_rev, period.proc_num);
            if let Some(existing) = periods.get(&key) {
                return Err(Error::ReferenceFile(format!(
                    "Found multiple {name} files with ARCH_REV={} and PROC_NUM={} ({}, {})",
                    key.0,
                    key.1,
                    existing.path.display(),
                    path.display()
                )));
            }
            periods.insert(key, period);
        }
        Ok(ValidRefFile {
            extname: extname.unwrap_or_default(),
            periods,
        })
    }

    /// `EXTNAME` shared by all files.
    #[must_use]
    pub fn extname(&self) -> &str {
        &self.extname
    }

    pub fn periods(&self) -> impl Iterator<Item = &ValidityPeriod> {
        self.periods.values()
    }

    /// Path of the highest version file valid at `utc`.
    ///
    /// # Errors
    /// No file covers `utc`.
    pub fn file_for(&self, utc: &Utc) -> Result<&Path> {
        let period = self
            .periods
            .values()
            .rev()
            .find(|p| p.contains(utc))
            .ok_or_else(|| {
                Error::ReferenceFile(format!(
                    "No applicable reference file of class {} was found for UTC time {utc}",
                    self.extname
                ))
            })?;
        debug!(path = %period.path.display(), %utc, "selected reference file");
        Ok(&period.path)
    }
}
