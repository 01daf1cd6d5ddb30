use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub type Scid = u16;
pub type Vcid = u8;

/// CHEOPS spacecraft id.
pub const CHEOPS_SCID: Scid = 0x2CB;
/// Virtual channel carrying housekeeping telemetry.
pub const VC_HK: Vcid = 1;
/// Virtual channel carrying science telemetry.
pub const VC_SCIENCE: Vcid = 3;
/// Virtual channel carrying event reports.
pub const VC_EVENTS: Vcid = 5;

/// TM transfer frame primary header.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub scid: Scid,
    pub vcid: Vcid,
    pub ocf: bool,
    pub mc_count: u8,
    pub vc_count: u8,
    pub secondary_header: bool,
    pub sync: bool,
    pub packet_order: bool,
    pub segment_length_id: u8,
    /// First header pointer. See [Frame::FHP_NO_PACKET_START] and [Frame::FHP_IDLE].
    pub fhp: u16,
}

impl FrameHeader {
    pub const LEN: usize = 6;

    /// Decode from bytes. Returns `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);
        Some(FrameHeader {
            version: buf[0] >> 6,
            scid: (d1 >> 4) & 0x3ff,
            vcid: (buf[1] >> 1) & 0x7,
            ocf: buf[1] & 0x1 == 1,
            mc_count: buf[2],
            vc_count: buf[3],
            secondary_header: buf[4] & 0x80 != 0,
            sync: buf[4] & 0x40 != 0,
            packet_order: buf[4] & 0x20 != 0,
            segment_length_id: (buf[4] >> 3) & 0x3,
            fhp: d3 & 0x7ff,
        })
    }
}

/// A TM transfer frame as produced by the CHEOPS on-board computer.
///
/// A frame has a 6 byte primary header, a 4 byte secondary header, the data
/// field and, when the OCF flag is set, a 4 byte operational control field.
///
/// ```
/// use cheops::telemetry::Frame;
///
/// let mut dat = vec![0u8; 50];
/// dat[..6].copy_from_slice(&[0x0d, 0x23, 0xaa, 0xbb, 0x9d, 0x55]);
/// let frame = Frame::decode(&dat).unwrap();
/// frame.validate().unwrap();
/// assert_eq!(frame.header.scid, 210);
/// assert_eq!(frame.header.vcid, 1);
/// assert_eq!(frame.header.fhp, 0x555);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    /// All frame bytes, including headers.
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Minimum number of bytes for a frame to be decoded.
    pub const MIN_LEN: usize = 7;
    /// Offset of the data field, after primary and secondary headers.
    pub const DATA_OFFSET: usize = 10;
    pub const OCF_LEN: usize = 4;
    /// First header pointer value when no packet starts in this frame.
    pub const FHP_NO_PACKET_START: u16 = 0x7ff;
    /// First header pointer value when the frame contains only idle data.
    pub const FHP_IDLE: u16 = 0x7fe;

    /// Decode a frame from `dat`, which must hold exactly one frame.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `dat` is shorter than [Frame::MIN_LEN].
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < Self::MIN_LEN {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: Self::MIN_LEN,
            });
        }
        // can't fail, length checked above
        let header = FrameHeader::decode(dat).ok_or(Error::NotEnoughData {
            actual: dat.len(),
            minimum: FrameHeader::LEN,
        })?;
        Ok(Frame {
            header,
            bytes: dat.to_vec(),
        })
    }

    /// Check the static header fields of a CHEOPS frame.
    ///
    /// # Errors
    /// [Error::InvalidFrame] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let b0 = self.bytes[0];
        let b4 = self.bytes[4];
        if b0 & 0xc0 != 0 {
            return Err(Error::InvalidFrame(format!(
                "Transfer Frame Version Number is {}, expected 0",
                b0 >> 6
            )));
        }
        if b4 & 0x80 == 0 {
            return Err(Error::InvalidFrame(
                "Transfer Frame Secondary Header Flag is not set".to_string(),
            ));
        }
        if b4 & 0x40 != 0 {
            return Err(Error::InvalidFrame(
                "Synchronization Flag is set, expected 0".to_string(),
            ));
        }
        if b4 & 0x20 != 0 {
            return Err(Error::InvalidFrame(
                "Packet Order Flag is set, expected 0".to_string(),
            ));
        }
        if b4 & 0x18 != 0x18 {
            return Err(Error::InvalidFrame(format!(
                "Segment Length Identifier is {}, expected 3",
                (b4 >> 3) & 0x3
            )));
        }
        Ok(())
    }

    /// The frame data field.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        let end = if self.header.ocf {
            self.bytes.len().saturating_sub(Self::OCF_LEN)
        } else {
            self.bytes.len()
        };
        if end <= Self::DATA_OFFSET {
            return &[];
        }
        &self.bytes[Self::DATA_OFFSET..end]
    }

    /// The operational control field, if present.
    #[must_use]
    pub fn ocf(&self) -> Option<&[u8]> {
        if !self.header.ocf || self.bytes.len() < Self::DATA_OFFSET + Self::OCF_LEN {
            return None;
        }
        Some(&self.bytes[self.bytes.len() - Self::OCF_LEN..])
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.header.fhp == Self::FHP_IDLE
    }
}
