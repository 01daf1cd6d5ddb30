//! FITS `DATASUM`/`CHECKSUM` as defined by the FITS checksum convention.

/// 32-bit ones' complement sum of big-endian words, continuing from `sum`.
/// `dat` length must be a multiple of 4.
#[must_use]
pub fn ones_complement_sum(dat: &[u8], sum: u32) -> u32 {
    let mut hi = u64::from(sum >> 16);
    let mut lo = u64::from(sum & 0xffff);
    for word in dat.chunks_exact(4) {
        hi += u64::from(u16::from_be_bytes([word[0], word[1]]));
        lo += u64::from(u16::from_be_bytes([word[2], word[3]]));
    }
    loop {
        let hicarry = hi >> 16;
        let locarry = lo >> 16;
        if hicarry == 0 && locarry == 0 {
            break;
        }
        hi = (hi & 0xffff) + locarry;
        lo = (lo & 0xffff) + hicarry;
    }
    ((hi << 16) + lo) as u32
}

/// Encode a sum as the 16 character ASCII `CHECKSUM` value.
#[must_use]
pub fn checksum_encode(sum: u32, complement: bool) -> String {
    const OFFSET: u32 = 0x30;
    let excluded = |c: u32| (0x3a..=0x40).contains(&c) || (0x5b..=0x60).contains(&c);

    let value = if complement { !sum } else { sum };
    let mut asc = [0u8; 16];
    for i in 0..4 {
        let byte = (value >> (24 - 8 * i)) & 0xff;
        let quotient = byte / 4 + OFFSET;
        let remainder = byte % 4;
        let mut ch = [quotient; 4];
        ch[0] += remainder;
        loop {
            let mut changed = false;
            for j in (0..4).step_by(2) {
                if excluded(ch[j]) || excluded(ch[j + 1]) {
                    ch[j] += 1;
                    ch[j + 1] -= 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for (j, c) in ch.iter().enumerate() {
            asc[4 * j + i] = *c as u8;
        }
    }
    // rotate right by one
    (0..16).map(|i| asc[(i + 15) % 16] as char).collect()
}
