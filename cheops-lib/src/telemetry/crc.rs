//! Packet error control checksum.
//!
//! PUS telemetry packets end with a CRC-16/CCITT-FALSE over all preceding bytes
//! (polynomial 0x1021, initial value 0xFFFF).
use crc::{Crc, CRC_16_IBM_3740};

const PEC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the packet error control value of `dat`.
#[must_use]
pub fn pec(dat: &[u8]) -> u16 {
    PEC.checksum(dat)
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(&[0x00, 0x00], 0x1D0F; "two zero bytes")]
    #[test_case(&[0x00, 0x00, 0x00], 0xCC9C; "three zero bytes")]
    #[test_case(&[0xAB, 0xCD, 0xEF, 0x01], 0x04A2; "four bytes")]
    #[test_case(&[0x14, 0x56, 0xF8, 0x9A, 0x00, 0x01], 0x7FD5; "six bytes")]
    fn pec_reference_values(dat: &[u8], expected: u16) {
        assert_eq!(pec(dat), expected, "pec of {dat:02x?}");
    }
}
