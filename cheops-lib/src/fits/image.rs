use std::fmt::Debug;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};

use super::{FitsError, FitsFile, FitsPath, Hdu, HduKind, Header};

/// A pixel type and its FITS representation.
pub trait Pixel: Copy + Default + Debug + PartialEq {
    const BITPIX: i64;
    /// `BZERO` of unsigned integer types stored as signed ones.
    const BZERO: Option<f64>;

    fn from_be(raw: &[u8]) -> Self;
    fn to_be(self, out: &mut [u8]);
}

macro_rules! pixel {
    ($t:ty, $bitpix:expr) => {
        impl Pixel for $t {
            const BITPIX: i64 = $bitpix;
            const BZERO: Option<f64> = None;

            fn from_be(raw: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&raw[..std::mem::size_of::<$t>()]);
                <$t>::from_be_bytes(buf)
            }

            fn to_be(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_be_bytes());
            }
        }
    };
    // stored as the signed type with the sign bit flipped
    ($t:ty, $bitpix:expr, $bzero:expr, $flip:expr) => {
        impl Pixel for $t {
            const BITPIX: i64 = $bitpix;
            const BZERO: Option<f64> = Some($bzero);

            fn from_be(raw: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(&raw[..std::mem::size_of::<$t>()]);
                <$t>::from_be_bytes(buf) ^ $flip
            }

            fn to_be(self, out: &mut [u8]) {
                out.copy_from_slice(&(self ^ $flip).to_be_bytes());
            }
        }
    };
}

pixel!(u8, 8);
pixel!(i8, 8, -128.0, i8::MIN);
pixel!(i16, 16);
pixel!(u16, 16, 32768.0, 1 << 15);
pixel!(i32, 32);
pixel!(u32, 32, 2_147_483_648.0, 1 << 31);
pixel!(i64, 64);
pixel!(u64, 64, 9_223_372_036_854_775_808.0, 1 << 63);
pixel!(f32, -32);
pixel!(f64, -64);

/// An N-dimensional image. Axis 0 is `NAXIS1`, the fastest varying one.
#[derive(Debug, Clone)]
pub struct Image<T: Pixel> {
    header: Header,
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Pixel> Image<T> {
    /// New image filled with zeros.
    #[must_use]
    pub fn new(extname: &str, shape: &[usize]) -> Self {
        let mut header = Header::default();
        header.set_with_comment("XTENSION", "IMAGE", "image extension", "");
        header.set_with_comment("BITPIX", T::BITPIX, "array data type", "");
        header.set_with_comment("NAXIS", shape.len() as u32, "number of array dimensions", "");
        for (n, len) in shape.iter().enumerate() {
            header.set(&format!("NAXIS{}", n + 1), *len as i64);
        }
        header.set_with_comment("PCOUNT", 0, "number of parameters", "");
        header.set_with_comment("GCOUNT", 1, "number of groups", "");
        if let Some(bzero) = T::BZERO {
            header.set("BSCALE", 1);
            match bzero {
                z if z.abs() < 9.0e18 => header.set("BZERO", z as i64),
                z => header.set("BZERO", z),
            }
        }
        header.set_with_comment("EXTNAME", extname, "extension name", "");
        Image {
            header,
            shape: shape.to_vec(),
            data: vec![T::default(); shape.iter().product()],
        }
    }

    /// Image from an image HDU. `BITPIX` and `BZERO` must match `T`.
    ///
    /// # Errors
    /// [FitsError::Unsupported] for another pixel type.
    pub fn from_hdu(hdu: &Hdu) -> Result<Self, FitsError> {
        let header = &hdu.header;
        let bitpix: i64 = header.get("BITPIX")?;
        let bzero = header.get_opt::<f64>("BZERO").filter(|z| *z != 0.0);
        if bitpix != T::BITPIX || bzero != T::BZERO {
            return Err(FitsError::Unsupported(format!(
                "HDU {} has BITPIX={bitpix} BZERO={bzero:?}, expected {} {:?}",
                hdu.name(),
                T::BITPIX,
                T::BZERO
            )));
        }
        let naxis: u32 = header.get("NAXIS")?;
        let shape = (1..=naxis)
            .map(|n| header.get::<u32>(&format!("NAXIS{n}")).map(|v| v as usize))
            .collect::<Result<Vec<_>, _>>()?;
        let width = (T::BITPIX.unsigned_abs() / 8) as usize;
        let len: usize = if shape.is_empty() { 0 } else { shape.iter().product() };
        if hdu.data.len() < len * width {
            return Err(FitsError::Truncated(format!("image {}", hdu.name())));
        }
        let data = hdu.data[..len * width]
            .chunks_exact(width)
            .map(T::from_be)
            .collect();
        Ok(Image {
            header: header.clone(),
            shape,
            data,
        })
    }

    /// Open an image. Without `[EXTNAME]` the primary array is used when it
    /// has data, otherwise the first image extension.
    ///
    /// # Errors
    /// See [FitsFile::open] and [Image::from_hdu].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FitsError> {
        let fits_path = FitsPath::parse(path);
        let file = FitsFile::open(&fits_path.file)?;
        let primary_has_data = file.hdus()[0].header.get_opt::<u32>("NAXIS").unwrap_or(0) > 0;
        let idx = match fits_path.extension {
            None if primary_has_data => 0,
            ext => file.select(ext.as_deref(), HduKind::Image)?,
        };
        Self::from_hdu(&file.hdus()[idx])
    }

    #[must_use]
    pub fn to_hdu(&self) -> Hdu {
        let width = (T::BITPIX.unsigned_abs() / 8) as usize;
        let mut data = vec![0u8; self.data.len() * width];
        for (v, out) in self.data.iter().zip(data.chunks_exact_mut(width)) {
            v.to_be(out);
        }
        Hdu {
            header: self.header.clone(),
            data,
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
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    fn flat_index(&self, coords: &[usize]) -> Result<usize, FitsError> {
        let out_of_range = || FitsError::IndexOutOfRange {
            index: coords.to_vec(),
            shape: self.shape.clone(),
        };
        if coords.len() != self.shape.len() {
            return Err(out_of_range());
        }
        let mut idx = 0;
        for (c, n) in coords.iter().zip(&self.shape).rev() {
            if c >= n {
                return Err(out_of_range());
            }
            idx = idx * n + c;
        }
        Ok(idx)
    }

    /// # Errors
    /// [FitsError::IndexOutOfRange]
    pub fn get(&self, idx: usize) -> Result<T, FitsError> {
        self.data
            .get(idx)
            .copied()
            .ok_or_else(|| FitsError::IndexOutOfRange {
                index: vec![idx],
                shape: vec![self.data.len()],
            })
    }

    /// # Errors
    /// [FitsError::IndexOutOfRange]
    pub fn set(&mut self, idx: usize, value: T) -> Result<(), FitsError> {
        let len = self.data.len();
        let px = self.data.get_mut(idx).ok_or(FitsError::IndexOutOfRange {
            index: vec![idx],
            shape: vec![len],
        })?;
        *px = value;
        Ok(())
    }

    /// Pixel at `coords`, `coords[0]` along `NAXIS1`.
    ///
    /// # Errors
    /// [FitsError::IndexOutOfRange]
    pub fn get_at(&self, coords: &[usize]) -> Result<T, FitsError> {
        self.get(self.flat_index(coords)?)
    }

    /// # Errors
    /// [FitsError::IndexOutOfRange]
    pub fn set_at(&mut self, coords: &[usize], value: T) -> Result<(), FitsError> {
        let idx = self.flat_index(coords)?;
        self.set(idx, value)
    }

    /// Copy into an array indexed `[.., NAXIS2, NAXIS1]`.
    ///
    /// # Errors
    /// The pixel count does not match the shape.
    pub fn to_array(&self) -> Result<ArrayD<T>, FitsError> {
        let shape: Vec<usize> = self.shape.iter().rev().copied().collect();
        ArrayD::from_shape_vec(IxDyn(&shape), self.data.clone())
            .map_err(|e| FitsError::Unsupported(e.to_string()))
    }

    /// Image from an array indexed `[.., NAXIS2, NAXIS1]`.
    #[must_use]
    pub fn from_array(extname: &str, array: &ArrayD<T>) -> Self {
        let shape: Vec<usize> = array.shape().iter().rev().copied().collect();
        let mut image = Self::new(extname, &shape);
        image.data = array.iter().copied().collect();
        image
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coordinates() {
        let mut image = Image::<u16>::new("PIX", &[3, 2]);
        image.set_at(&[2, 1], 7).unwrap();
        assert_eq!(image.get(5).unwrap(), 7);
        assert_eq!(image.get_at(&[2, 1]).unwrap(), 7);
        assert!(image.get_at(&[3, 0]).is_err());
        assert!(image.get_at(&[0]).is_err());
        assert!(image.set(6, 1).is_err());

        let array = image.to_array().unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array[[1, 2]], 7);
        let copy = Image::from_array("PIX", &array);
        assert_eq!(copy.pixels(), image.pixels());
    }

    #[test]
    fn unsigned_pixels_use_bzero() {
        let mut image = Image::<u16>::new("PIX", &[2]);
        image.set(0, 0).unwrap();
        image.set(1, 65535).unwrap();
        assert_eq!(image.header().get::<i64>("BZERO").unwrap(), 32768);

        let hdu = image.to_hdu();
        assert_eq!(hdu.data, vec![0x80, 0x00, 0x7f, 0xff]);
        let copy = Image::<u16>::from_hdu(&hdu).unwrap();
        assert_eq!(copy.pixels(), &[0, 65535]);
        assert!(Image::<i16>::from_hdu(&hdu).is_err());
    }

    #[test]
    fn float_pixels() {
        let mut image = Image::<f64>::new("PIX", &[2, 2, 2]);
        image.set_at(&[1, 1, 1], -1.5).unwrap();
        let copy = Image::<f64>::from_hdu(&image.to_hdu()).unwrap();
        assert_eq!(copy.get(7).unwrap(), -1.5);
        assert_eq!(copy.shape(), &[2, 2, 2]);
    }

    #[test]
    fn saved_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.fits");
        let mut image = Image::<i32>::new("COUNTS", &[4, 4]);
        image.set_at(&[3, 0], -12).unwrap();

        let mut file = FitsFile::create(&path);
        file.append(image.to_hdu());
        file.save().unwrap();

        let copy = Image::<i32>::open(&path).unwrap();
        assert_eq!(copy.get_at(&[3, 0]).unwrap(), -12);
        assert_eq!(copy.header().name(), "COUNTS");
    }
}
