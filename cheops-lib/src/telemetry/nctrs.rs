//! NCTRS telemetry data units as delivered by the ground station network.
use std::io::{ErrorKind, Read};

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{FieldReader, Frame};
use crate::{Error, Result};

/// NCTRS TM data unit header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NctrsHeader {
    /// Total size of the data unit, header included.
    pub packet_size: u32,
    pub scid: u16,
    pub data_stream_type: u8,
    pub vcid: u8,
    pub route_id: u16,
    pub earth_reception_time: u64,
    pub sequence_flag: u8,
    pub quality_flag: u8,
}

impl NctrsHeader {
    pub const LEN: usize = 20;

    /// # Errors
    /// [Error::NotEnoughData] if `buf` is shorter than [NctrsHeader::LEN].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(buf);
        Ok(NctrsHeader {
            packet_size: r.read_u32()?,
            scid: r.read_u16()?,
            data_stream_type: r.read_u8()?,
            vcid: r.read_u8()?,
            route_id: r.read_u16()?,
            earth_reception_time: r.read_u64()?,
            sequence_flag: r.read_u8()?,
            quality_flag: r.read_u8()?,
        })
    }
}

/// Bytes surrounding the transfer frame inside the NCTRS user data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    /// Attached sync marker length preceding the frame.
    pub asm_len: usize,
    /// Reed-Solomon check symbols following the frame.
    pub trailer_len: usize,
}

impl FrameLayout {
    /// CHEOPS downlink: 4 byte ASM, 160 bytes of Reed-Solomon symbols.
    pub const CHEOPS: FrameLayout = FrameLayout {
        asm_len: 4,
        trailer_len: 160,
    };
}

/// One NCTRS TM data unit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NctrsUnit {
    pub header: NctrsHeader,
    pub user_data: Vec<u8>,
}

impl NctrsUnit {
    /// Decode the transfer frame carried by this unit.
    ///
    /// # Errors
    /// [Error::InvalidNctrs] if the layout does not fit the user data, or any
    /// error from [Frame::decode].
    pub fn frame(&self, layout: FrameLayout) -> Result<Frame> {
        let end = self
            .user_data
            .len()
            .checked_sub(layout.trailer_len)
            .filter(|end| *end > layout.asm_len)
            .ok_or_else(|| {
                Error::InvalidNctrs(format!(
                    "user data of {} bytes too short for frame layout {layout:?}",
                    self.user_data.len()
                ))
            })?;
        Frame::decode(&self.user_data[layout.asm_len..end])
    }
}

/// Iterator over NCTRS data units, see [read_nctrs].
pub struct NctrsIter<R>
where
    R: Read + Send,
{
    reader: R,
    offset: usize,
    done: bool,
}

impl<R> NctrsIter<R>
where
    R: Read + Send,
{
    /// Byte offset of the next unit.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_unit(&mut self) -> Result<Option<NctrsUnit>> {
        let mut hdr = [0u8; NctrsHeader::LEN];
        if let Err(err) = self.reader.read_exact(&mut hdr) {
            if err.kind() == ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(err.into());
        }
        let header = NctrsHeader::decode(&hdr)?;
        let size = header.packet_size as usize;
        if size < NctrsHeader::LEN {
            return Err(Error::InvalidNctrs(format!(
                "packet size {size} at offset {} smaller than header",
                self.offset
            )));
        }
        let mut user_data = vec![0u8; size - NctrsHeader::LEN];
        self.reader.read_exact(&mut user_data).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::InvalidNctrs(format!(
                    "data unit at offset {} truncated, expected {size} bytes",
                    self.offset
                ))
            } else {
                err.into()
            }
        })?;
        trace!(offset = self.offset, size, vcid = header.vcid, "nctrs unit");
        self.offset += size;
        Ok(Some(NctrsUnit { header, user_data }))
    }
}

impl<R> Iterator for NctrsIter<R>
where
    R: Read + Send,
{
    type Item = Result<NctrsUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_unit() {
            Ok(Some(unit)) => Some(Ok(unit)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Read NCTRS data units from `reader` until end of input.
///
/// A data unit with an invalid size or truncated user data ends iteration with
/// an error item.
pub fn read_nctrs<R>(reader: R) -> NctrsIter<R>
where
    R: Read + Send,
{
    NctrsIter {
        reader,
        offset: 0,
        done: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unit(vcid: u8, user_data: &[u8]) -> Vec<u8> {
        let size = (NctrsHeader::LEN + user_data.len()) as u32;
        let mut dat = size.to_be_bytes().to_vec();
        dat.extend_from_slice(&0x2cbu16.to_be_bytes());
        dat.push(0);
        dat.push(vcid);
        dat.extend_from_slice(&7u16.to_be_bytes());
        dat.extend_from_slice(&0x0102_0304_0506_0708u64.to_be_bytes());
        dat.extend_from_slice(&[1, 0]);
        dat.extend_from_slice(user_data);
        dat
    }

    #[test]
    fn iterate_units() {
        let mut dat = unit(1, &[0xaa; 30]);
        dat.extend(unit(3, &[0xbb; 12]));

        let units: Vec<NctrsUnit> = read_nctrs(&dat[..]).map(Result::unwrap).collect();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].header.packet_size, 50);
        assert_eq!(units[0].header.scid, 0x2cb);
        assert_eq!(units[0].header.vcid, 1);
        assert_eq!(units[0].header.route_id, 7);
        assert_eq!(units[0].header.earth_reception_time, 0x0102_0304_0506_0708);
        assert_eq!(units[0].header.sequence_flag, 1);
        assert_eq!(units[1].user_data, vec![0xbb; 12]);
    }

    #[test]
    fn truncated_unit_is_error() {
        let dat = unit(1, &[0xaa; 30]);
        let mut iter = read_nctrs(&dat[..dat.len() - 5]);
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn frame_with_layout() {
        let mut user_data = vec![0x1a, 0xcf, 0xfc, 0x1d];
        let mut frame = vec![0u8; 40];
        frame[..6].copy_from_slice(&[0x0d, 0x22, 0x01, 0x02, 0x98, 0x00]);
        user_data.extend(&frame);
        user_data.extend([0xee; 8]);
        let dat = unit(1, &user_data);

        let unit = read_nctrs(&dat[..]).next().unwrap().unwrap();
        let layout = FrameLayout {
            asm_len: 4,
            trailer_len: 8,
        };
        let frame = unit.frame(layout).unwrap();
        assert_eq!(frame.bytes.len(), 40);
        assert_eq!(frame.header.vcid, 1);
        assert_eq!(frame.header.vc_count, 2);

        assert!(unit.frame(FrameLayout::CHEOPS).is_err());
    }
}
