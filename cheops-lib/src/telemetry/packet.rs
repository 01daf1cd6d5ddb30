use std::fmt::Display;
use std::io::{Read, Result as IOResult};

use serde::{Deserialize, Serialize};

use super::crc::pec;
use crate::{Error, Result};

pub type Apid = u16;

/// Packet is the first packet in a packet group
pub const SEQ_FIRST: u8 = 1;
/// Packet is a part of a packet group, but not first and not last
pub const SEQ_CONTINUATION: u8 = 0;
/// Packet is the last packet in a packet group
pub const SEQ_LAST: u8 = 2;
/// Packet is not part of a packet group, i.e., standalone.
pub const SEQ_UNSEGMENTED: u8 = 3;

/// CCSDS Primary Header
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub version: u8,
    pub type_flag: u8,
    pub has_secondary_header: bool,
    pub apid: Apid,
    /// Defines a packets grouping. See the `SEQ_*` values.
    pub sequence_flags: u8,
    pub sequence_count: u16,
    pub len_minus1: u16,
}

impl PrimaryHeader {
    pub const LEN: usize = 6;
    pub const SEQ_MAX: u16 = 16383;

    /// Decode from bytes. Returns `None` if there are not enough bytes.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::LEN {
            return None;
        }
        let d1 = u16::from_be_bytes([buf[0], buf[1]]);
        let d2 = u16::from_be_bytes([buf[2], buf[3]]);
        let d3 = u16::from_be_bytes([buf[4], buf[5]]);

        Some(PrimaryHeader {
            version: (d1 >> 13 & 0x7) as u8,
            type_flag: (d1 >> 12 & 0x1) as u8,
            has_secondary_header: (d1 >> 11 & 0x1) == 1,
            apid: (d1 & 0x7ff),
            sequence_flags: (d2 >> 14 & 0x3) as u8,
            sequence_count: (d2 & 0x3fff),
            len_minus1: d3,
        })
    }

    /// Total packet length in bytes, headers and PEC included.
    #[must_use]
    pub fn packet_len(&self) -> usize {
        self.len_minus1 as usize + 1 + Self::LEN
    }
}

/// PUS telemetry data field header.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct DataFieldHeader {
    pub service_type: u8,
    pub service_subtype: u8,
    pub destination: u8,
    /// Raw 48 bit on-board time; bit 0 is the synchronisation flag.
    pub obt: i64,
}

impl DataFieldHeader {
    /// Offset of the data field header in the packet.
    pub const OFFSET: usize = 6;
    pub const LEN: usize = 10;

    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::OFFSET + Self::LEN {
            return None;
        }
        let mut obt = [0u8; 8];
        obt[2..].copy_from_slice(&buf[10..16]);
        Some(DataFieldHeader {
            service_type: buf[7],
            service_subtype: buf[8],
            destination: buf[9],
            obt: i64::from_be_bytes(obt),
        })
    }
}

/// A PUS telemetry source packet.
///
/// ```
/// use cheops::telemetry::TmPacket;
///
/// #[rustfmt::skip]
/// let dat: &[u8] = &[
///     0x08, 0x00, 0xC0, 0x00, 0x00, 0x0B, 0x10, 0x01, 0x01, 0x00,
///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE5, 0x5C,
/// ];
/// let packet = TmPacket::decode(dat).unwrap();
/// packet.validate().unwrap();
/// assert_eq!(packet.len(), 18);
/// assert_eq!(packet.service().unwrap().service_type, 1);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TmPacket {
    pub header: PrimaryHeader,
    /// Packet bytes, up to the packet length given by the header.
    pub bytes: Vec<u8>,
}

impl Display for TmPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TmPacket{{apid: {}, seq: {}, len: {}}}",
            self.header.apid,
            self.header.sequence_count,
            self.bytes.len()
        )
    }
}

impl TmPacket {
    pub const MIN_LEN: usize = 7;
    /// Offset of the user data following the data field header.
    pub const DATA_OFFSET: usize = 16;
    pub const PEC_LEN: usize = 2;

    /// Decode the packet starting at `dat[0]`. Bytes beyond the packet length
    /// are ignored; a truncated packet is kept and reported by [TmPacket::validate].
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `dat` has fewer than [TmPacket::MIN_LEN] bytes.
    pub fn decode(dat: &[u8]) -> Result<Self> {
        if dat.len() < Self::MIN_LEN {
            return Err(Error::NotEnoughData {
                actual: dat.len(),
                minimum: Self::MIN_LEN,
            });
        }
        let header = PrimaryHeader::decode(dat).ok_or(Error::NotEnoughData {
            actual: dat.len(),
            minimum: PrimaryHeader::LEN,
        })?;
        let end = header.packet_len().min(dat.len());
        Ok(TmPacket {
            header,
            bytes: dat[..end].to_vec(),
        })
    }

    /// Read a single packet.
    ///
    /// # Errors
    /// Any ``std::io::Error`` reading
    pub fn read<R>(mut r: R) -> IOResult<TmPacket>
    where
        R: Read + Send,
    {
        let mut hdr = [0u8; PrimaryHeader::LEN];
        r.read_exact(&mut hdr)?;
        let mut bytes = hdr.to_vec();
        // read_exact filled the header
        let header = PrimaryHeader::decode(&hdr).ok_or(std::io::ErrorKind::InvalidData)?;
        bytes.resize(header.packet_len(), 0);
        r.read_exact(&mut bytes[PrimaryHeader::LEN..])?;
        Ok(TmPacket { header, bytes })
    }

    /// Length of the packet according to its header.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.packet_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.bytes.len() < self.len()
    }

    /// The PUS data field header, `None` for truncated packets.
    #[must_use]
    pub fn service(&self) -> Option<DataFieldHeader> {
        DataFieldHeader::decode(&self.bytes)
    }

    /// Packet error control value stored in the last two bytes.
    #[must_use]
    pub fn pec(&self) -> u16 {
        let n = self.bytes.len();
        if n < Self::PEC_LEN {
            return 0;
        }
        u16::from_be_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    /// User data between the data field header and the PEC.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        let end = self.bytes.len().saturating_sub(Self::PEC_LEN);
        if end <= Self::DATA_OFFSET {
            return &[];
        }
        &self.bytes[Self::DATA_OFFSET..end]
    }

    /// Validate length, checksum and the static header fields of a CHEOPS TM packet.
    ///
    /// # Errors
    /// [Error::InvalidPacket] describing the first failed check.
    pub fn validate(&self) -> Result<()> {
        if self.is_truncated() {
            return Err(Error::InvalidPacket(format!(
                "The packet is truncated, header gives {} bytes but only {} are available.",
                self.len(),
                self.bytes.len()
            )));
        }
        let computed = pec(&self.bytes[..self.bytes.len() - Self::PEC_LEN]);
        let read = self.pec();
        if computed != read {
            return Err(Error::InvalidPacket(format!(
                "The packet is corrupted, checksum validation failed. Computed 0x{computed:04x}, read 0x{read:04x}."
            )));
        }
        if self.header.version != 0 {
            return Err(Error::InvalidPacket(format!(
                "Packet Version Number is {}, expected 0",
                self.header.version
            )));
        }
        if self.header.type_flag != 0 {
            return Err(Error::InvalidPacket(
                "Packet Type is telecommand, expected telemetry".to_string(),
            ));
        }
        if !self.header.has_secondary_header {
            return Err(Error::InvalidPacket(
                "Data Field Header Flag is not set".to_string(),
            ));
        }
        if self.header.sequence_flags != SEQ_UNSEGMENTED {
            return Err(Error::InvalidPacket(format!(
                "Segmentation Flags are {}, expected unsegmented packet",
                self.header.sequence_flags
            )));
        }
        Ok(())
    }
}

/// Calculate the number of missing sequence counts.
///
/// `cur` is the current sequence count. `last` is the sequence count seen before `cur`.
#[must_use]
pub fn missing_packets(cur: u16, last: u16) -> u16 {
    let (cur, last) = (u32::from(cur), u32::from(last));
    let max = u32::from(PrimaryHeader::SEQ_MAX);
    let expected = if last + 1 > max { 0 } else { last + 1 };
    if cur == expected {
        return 0;
    }
    let missing = if last + 1 > cur {
        (cur + max).saturating_sub(last)
    } else {
        cur - last - 1
    };
    u16::try_from(missing).unwrap_or(u16::MAX)
}

/// Iterator over packets read back to back from a reader, see [read_packets].
pub struct PacketReaderIter<R>
where
    R: Read + Send,
{
    reader: R,
}

impl<R> Iterator for PacketReaderIter<R>
where
    R: Read + Send,
{
    type Item = IOResult<TmPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        match TmPacket::read(&mut self.reader) {
            Ok(p) => Some(Ok(p)),
            Err(err) => {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    return None;
                }
                Some(Err(err))
            }
        }
    }
}

/// Read packets written back to back, e.g., by the `extract` command.
pub fn read_packets<R>(reader: R) -> PacketReaderIter<R>
where
    R: Read + Send,
{
    PacketReaderIter { reader }
}

#[cfg(test)]
mod test {
    use super::*;

    // HK default report: APID 0x3C1, service (3, 25), OBT 0x0123456789AB
    fn hk_packet() -> Vec<u8> {
        #[rustfmt::skip]
        let mut dat = vec![
            0x0B, 0xC1, 0xC0, 0x00, 0x00, 0x2B,
            0x10, 0x03, 0x19, 0x00, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
            0x00, 0x01, 0x00, 0x05, 0x00, 0x05, 0x80,
        ];
        dat.resize(48, 0);
        let crc = pec(&dat);
        dat.extend_from_slice(&crc.to_be_bytes());
        dat
    }

    fn with_pec(mut dat: Vec<u8>) -> Vec<u8> {
        let n = dat.len();
        let crc = pec(&dat[..n - 2]);
        dat[n - 2..].copy_from_slice(&crc.to_be_bytes());
        dat
    }

    #[test]
    fn decode_fields() {
        let packet = TmPacket::decode(&hk_packet()).unwrap();
        packet.validate().unwrap();

        assert_eq!(packet.len(), 50);
        assert_eq!(packet.header.apid, 0x3c1);
        assert_eq!(packet.header.sequence_count, 0);
        let service = packet.service().unwrap();
        assert_eq!(service.service_type, 3);
        assert_eq!(service.service_subtype, 25);
        assert_eq!(service.destination, 0);
        assert_eq!(service.obt, 0x0123_4567_89ab);
        assert_eq!(packet.data().len(), 32);
    }

    #[test]
    fn data_field_reading() {
        let packet = TmPacket::decode(&hk_packet()).unwrap();
        let mut r = crate::telemetry::FieldReader::new(packet.data());
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0001);
        assert_eq!(r.read_u32().unwrap(), 0x0005_0005);
        assert_eq!(r.read_u8().unwrap(), 0x80);
        assert_eq!(r.offset(), 7);
    }

    #[test]
    fn too_short() {
        assert!(TmPacket::decode(&[]).is_err());
        assert!(TmPacket::decode(&[0u8; 6]).is_err());
    }

    #[test]
    fn truncated() {
        let dat = hk_packet();
        let packet = TmPacket::decode(&dat[..dat.len() - 1]).unwrap();
        let err = packet.validate().unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn corrupted_pec() {
        let mut dat = hk_packet();
        let n = dat.len();
        dat[n - 1] = dat[n - 1].wrapping_add(1);
        let err = TmPacket::decode(&dat).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("checksum validation failed"), "{err}");
    }

    #[test]
    fn invalid_headers() {
        let cases: [(usize, fn(u8) -> u8, &str); 4] = [
            (0, |b| b | 0xe0, "Version"),
            (0, |b| b | 0x10, "telecommand"),
            (0, |b| b & !0x08, "Data Field Header"),
            (2, |b| b & !0xc0, "Segmentation"),
        ];
        for (idx, corrupt, msg) in cases {
            let mut dat = hk_packet();
            dat[idx] = corrupt(dat[idx]);
            let dat = with_pec(dat);
            let err = TmPacket::decode(&dat).unwrap().validate().unwrap_err();
            assert!(err.to_string().contains(msg), "expected {msg:?} in {err}");
        }
    }

    #[test]
    fn read_back_to_back() {
        let mut dat = hk_packet();
        dat.extend(hk_packet());
        let packets: Vec<TmPacket> = read_packets(&dat[..]).map(|r| r.unwrap()).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1].bytes, hk_packet());
    }

    #[test]
    fn missing_sequence_counts() {
        assert_eq!(missing_packets(5, 4), 0);
        assert_eq!(missing_packets(10, 4), 5);
        assert_eq!(missing_packets(0, PrimaryHeader::SEQ_MAX), 0);
        // out of range counts must not overflow
        assert_eq!(missing_packets(0, u16::MAX), 0);
        assert_eq!(missing_packets(u16::MAX, 0), u16::MAX - 1);
    }
}
