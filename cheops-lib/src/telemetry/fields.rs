use crate::{Error, Result};

/// Sequential big-endian field reader over a byte buffer.
///
/// ```
/// use cheops::telemetry::FieldReader;
///
/// let mut r = FieldReader::new(&[0x01, 0x02, 0x03, 0x04, 0x05]);
/// assert_eq!(r.read_u8().unwrap(), 0x01);
/// assert_eq!(r.read_u32().unwrap(), 0x0203_0405);
/// assert_eq!(r.offset(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        FieldReader { buf, offset: 0 }
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        if end > self.buf.len() {
            return Err(Error::NotEnoughData {
                actual: self.buf.len(),
                minimum: end,
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.offset..end]);
        self.offset = end;
        Ok(out)
    }

    /// # Errors
    /// [Error::NotEnoughData] if the buffer is exhausted.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    /// # Errors
    /// [Error::NotEnoughData] if the buffer is exhausted.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    /// # Errors
    /// [Error::NotEnoughData] if the buffer is exhausted.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// # Errors
    /// [Error::NotEnoughData] if the buffer is exhausted.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take()?))
    }

    /// Advance by `n` bytes without decoding them.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if fewer than `n` bytes remain.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.offset + n > self.buf.len() {
            return Err(Error::NotEnoughData {
                actual: self.buf.len(),
                minimum: self.offset + n,
            });
        }
        self.offset += n;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_in_sequence() {
        #[rustfmt::skip]
        let dat: &[u8] = &[
            0xab,
            0x12, 0x34,
            0xde, 0xad, 0xbe, 0xef,
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
        ];
        let mut r = FieldReader::new(dat);
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.offset(), 7);
        assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn read_past_end() {
        let mut r = FieldReader::new(&[0x00, 0x01, 0x02]);
        r.skip(2).unwrap();
        let err = r.read_u16().unwrap_err();
        assert!(
            matches!(err, Error::NotEnoughData { actual: 3, minimum: 4 }),
            "{err:?}"
        );
        // failed read does not consume
        assert_eq!(r.read_u8().unwrap(), 0x02);
    }
}
