use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{checksum_encode, ones_complement_sum, FitsError, FitsPath, Header, BLOCK_LEN};

const CHECKSUM_PLACEHOLDER: &str = "0000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HduKind {
    Primary,
    Image,
    BinTable,
}

/// A header and its (unpadded) data.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdu {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Hdu {
    /// Empty primary HDU.
    #[must_use]
    pub fn primary() -> Self {
        let mut header = Header::default();
        header.set_with_comment("SIMPLE", true, "conforms to FITS standard", "");
        header.set_with_comment("BITPIX", 8, "array data type", "");
        header.set_with_comment("NAXIS", 0, "number of array dimensions", "");
        header.set_with_comment("EXTEND", true, "", "");
        Hdu {
            header,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> HduKind {
        if self.header.contains("SIMPLE") {
            return HduKind::Primary;
        }
        match self.header.get_opt::<String>("XTENSION").as_deref() {
            Some("BINTABLE") => HduKind::BinTable,
            _ => HduKind::Image,
        }
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.header.name()
    }

    /// Data length in bytes as given by `BITPIX`, `NAXISn`, `PCOUNT` and
    /// `GCOUNT`.
    ///
    /// # Errors
    /// A mandatory keyword is missing or negative, or the size overflows.
    pub fn data_len(header: &Header) -> Result<usize, FitsError> {
        let bitpix: i64 = header.get("BITPIX")?;
        let naxis: usize = header.get::<u32>("NAXIS")? as usize;
        if naxis == 0 {
            return Ok(0);
        }
        let overflow = || FitsError::InvalidKeyword {
            keyword: "NAXIS".to_string(),
            msg: "data size overflows".to_string(),
        };
        let mut len = (bitpix.unsigned_abs() / 8) as usize;
        for n in 1..=naxis {
            let axis = header.get::<u32>(&format!("NAXIS{n}"))? as usize;
            len = len.checked_mul(axis).ok_or_else(overflow)?;
        }
        let pcount = header.get_opt::<u32>("PCOUNT").unwrap_or(0) as usize;
        let gcount = header.get_opt::<u32>("GCOUNT").unwrap_or(1) as usize;
        len.checked_add(pcount)
            .and_then(|n| n.checked_mul(gcount))
            .ok_or_else(overflow)
    }

    fn padded_data(&self) -> Vec<u8> {
        let mut dat = self.data.clone();
        dat.resize(dat.len().div_ceil(BLOCK_LEN) * BLOCK_LEN, 0);
        dat
    }

    /// Ones' complement sum of the padded data.
    #[must_use]
    pub fn datasum(&self) -> u32 {
        ones_complement_sum(&self.padded_data(), 0)
    }

    /// Update `DATASUM` and `CHECKSUM`.
    ///
    /// # Errors
    /// The header can not be serialised.
    pub fn update_checksum(&mut self) -> Result<(), FitsError> {
        let datasum = self.datasum();
        self.header
            .set_with_comment("DATASUM", datasum.to_string(), "data unit checksum", "");
        self.header
            .set_with_comment("CHECKSUM", CHECKSUM_PLACEHOLDER, "HDU checksum", "");
        let sum = ones_complement_sum(&self.header.to_bytes()?, datasum);
        self.header.set("CHECKSUM", checksum_encode(sum, true));
        Ok(())
    }

    /// Verify `DATASUM` and `CHECKSUM`. Missing keywords only warn.
    ///
    /// # Errors
    /// [FitsError::Checksum] naming the keyword(s) that do not match.
    pub fn verify_checksum(&self) -> Result<(), FitsError> {
        self.verify_checksum_with(&self.header.to_bytes()?)
    }

    /// Verify against the header bytes as read from a file.
    fn verify_checksum_with(&self, header_bytes: &[u8]) -> Result<(), FitsError> {
        let datasum_kw = self.header.get_opt::<String>("DATASUM");
        let has_checksum = self.header.contains("CHECKSUM");
        let missing: Vec<&str> = [
            ("DATASUM", datasum_kw.is_some()),
            ("CHECKSUM", has_checksum),
        ]
        .iter()
        .filter(|(_, present)| !present)
        .map(|(kw, _)| *kw)
        .collect();
        if !missing.is_empty() {
            warn!(
                "Keyword(s) {} not exist in {}. Cannot validate the checksum.",
                missing.join(" and "),
                self.name()
            );
        }

        let datasum = self.datasum();
        let datasum_ok = datasum_kw.map_or(true, |s| s.trim().parse::<u32>().ok() == Some(datasum));
        let checksum_ok = !has_checksum || {
            let sum = ones_complement_sum(header_bytes, datasum);
            sum == 0xffff_ffff || sum == 0
        };
        let keywords = match (datasum_ok, checksum_ok) {
            (true, true) => return Ok(()),
            (false, false) => "s DATASUM and CHECKSUM.",
            (false, true) => " DATASUM.",
            (true, false) => " CHECKSUM.",
        };
        Err(FitsError::Checksum {
            hdu: self.name(),
            keywords: keywords.to_string(),
        })
    }
}

/// A FITS file as an ordered list of HDUs held in memory.
#[derive(Debug, Clone)]
pub struct FitsFile {
    path: PathBuf,
    hdus: Vec<Hdu>,
}

impl FitsFile {
    /// New file with an empty primary HDU, nothing is written before
    /// [FitsFile::save].
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        FitsFile {
            path: path.as_ref().to_path_buf(),
            hdus: vec![Hdu::primary()],
        }
    }

    /// Read all HDUs and verify their checksums. An `[EXTNAME]` suffix of
    /// `path` is ignored here, see [FitsFile::select].
    ///
    /// # Errors
    /// I/O failures, malformed headers, truncated data or wrong checksums.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FitsError> {
        let path = FitsPath::parse(path).file;
        let dat = fs::read(&path).map_err(|source| FitsError::Io {
            path: path.clone(),
            source,
        })?;
        let hdus = Self::parse_hdus(&dat, true)?;
        debug!(path = %path.display(), hdus = hdus.len(), "opened FITS file");
        Ok(FitsFile { path, hdus })
    }

    /// Parse HDUs from the content of a file.
    ///
    /// # Errors
    /// Malformed headers or truncated data.
    pub fn parse(dat: &[u8]) -> Result<Vec<Hdu>, FitsError> {
        Self::parse_hdus(dat, false)
    }

    fn parse_hdus(dat: &[u8], verify: bool) -> Result<Vec<Hdu>, FitsError> {
        let mut hdus = Vec::new();
        let mut offset = 0;
        while offset < dat.len() {
            let (header, header_len) = Header::parse(&dat[offset..])?;
            if offset + header_len > dat.len() {
                return Err(FitsError::Truncated("incomplete header block".to_string()));
            }
            let header_bytes = &dat[offset..offset + header_len];
            offset += header_len;
            let len = Hdu::data_len(&header)?;
            if offset + len > dat.len() {
                return Err(FitsError::Truncated(format!(
                    "HDU {} expects {len} data bytes",
                    header.name()
                )));
            }
            let data = dat[offset..offset + len].to_vec();
            offset += len.div_ceil(BLOCK_LEN) * BLOCK_LEN;
            let hdu = Hdu { header, data };
            if verify {
                hdu.verify_checksum_with(header_bytes)?;
            }
            hdus.push(hdu);
        }
        if hdus.is_empty() {
            return Err(FitsError::Truncated("no HDU".to_string()));
        }
        Ok(hdus)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    #[must_use]
    pub fn hdu(&self, idx: usize) -> Option<&Hdu> {
        self.hdus.get(idx)
    }

    pub fn hdu_mut(&mut self, idx: usize) -> Option<&mut Hdu> {
        self.hdus.get_mut(idx)
    }

    /// Index of the first HDU with the given `EXTNAME`.
    #[must_use]
    pub fn find(&self, extname: &str) -> Option<usize> {
        self.hdus
            .iter()
            .position(|h| h.header.get_opt::<String>("EXTNAME").as_deref() == Some(extname))
    }

    /// Index of the HDU selected by `[EXTNAME]`, or the first HDU of `kind`
    /// after the primary one.
    ///
    /// # Errors
    /// [FitsError::NoSuchExtension] if nothing matches.
    pub fn select(&self, extension: Option<&str>, kind: HduKind) -> Result<usize, FitsError> {
        let idx = match extension {
            Some(name) => self.find(name),
            None => self.hdus.iter().skip(1).position(|h| h.kind() == kind).map(|i| i + 1),
        };
        idx.ok_or_else(|| FitsError::NoSuchExtension {
            name: extension.map_or_else(|| format!("{kind:?}"), str::to_string),
            path: self.path.clone(),
        })
    }

    /// Append an HDU, returning its index.
    pub fn append(&mut self, hdu: Hdu) -> usize {
        self.hdus.push(hdu);
        self.hdus.len() - 1
    }

    /// Serialise all HDUs after updating their checksums.
    ///
    /// # Errors
    /// A header can not be serialised.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, FitsError> {
        let mut out = Vec::new();
        for hdu in &mut self.hdus {
            hdu.update_checksum()?;
            out.extend(hdu.header.to_bytes()?);
            out.extend(hdu.padded_data());
        }
        Ok(out)
    }

    /// Write the file to its path.
    ///
    /// # Errors
    /// I/O failures or unserialisable headers.
    pub fn save(&mut self) -> Result<(), FitsError> {
        let dat = self.to_bytes()?;
        fs::write(&self.path, dat).map_err(|source| FitsError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), hdus = self.hdus.len(), "saved FITS file");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn image_hdu() -> Hdu {
        let mut header = Header::default();
        header.set("XTENSION", "IMAGE");
        header.set("BITPIX", 16);
        header.set("NAXIS", 1);
        header.set("NAXIS1", 3);
        header.set("PCOUNT", 0);
        header.set("GCOUNT", 1);
        header.set("EXTNAME", "PIXELS");
        Hdu {
            header,
            data: vec![0, 1, 0, 2, 0, 3],
        }
    }

    #[test]
    fn checksum_written_and_verified() {
        let mut hdu = image_hdu();
        hdu.update_checksum().unwrap();
        assert_eq!(hdu.header.get::<String>("DATASUM").unwrap(), "262146");
        hdu.verify_checksum().unwrap();

        let sum = ones_complement_sum(&hdu.header.to_bytes().unwrap(), hdu.datasum());
        assert_eq!(sum, 0xffff_ffff);
    }

    #[test]
    fn modified_data_fails_verification() {
        let mut hdu = image_hdu();
        hdu.update_checksum().unwrap();
        hdu.data[1] = 9;
        let err = hdu.verify_checksum().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Checksum of HDU PIXELS is wrong. See keywords DATASUM and CHECKSUM."
        );
    }

    #[test]
    fn data_len_overflow() {
        let mut header = image_hdu().header;
        assert_eq!(Hdu::data_len(&header).unwrap(), 6);
        header.set("BITPIX", 64);
        header.set("NAXIS", 3);
        for n in 1..=3 {
            header.set(&format!("NAXIS{n}"), u32::MAX);
        }
        assert!(matches!(
            Hdu::data_len(&header),
            Err(FitsError::InvalidKeyword { .. })
        ));
    }

    #[test]
    fn missing_checksum_only_warns() {
        image_hdu().verify_checksum().unwrap();
    }

    #[test]
    fn save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.fits");
        let mut file = FitsFile::create(&path);
        file.append(image_hdu());
        file.save().unwrap();

        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len, 3 * BLOCK_LEN as u64);

        let file = FitsFile::open(format!("{}[PIXELS]", path.display())).unwrap();
        assert_eq!(file.hdus().len(), 2);
        assert_eq!(file.hdu(0).unwrap().kind(), HduKind::Primary);
        assert_eq!(file.find("PIXELS"), Some(1));
        assert_eq!(file.select(None, HduKind::Image).unwrap(), 1);
        assert!(file.select(Some("OTHER"), HduKind::Image).is_err());
        assert_eq!(file.hdu(1).unwrap().data, vec![0, 1, 0, 2, 0, 3]);
    }
}
