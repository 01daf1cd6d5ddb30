#![allow(dead_code)]
use cheops::telemetry::{pec, FrameLayout, NctrsHeader, Vcid, CHEOPS_SCID};

pub const FRAME_LEN: usize = 64;

/// A PUS TM packet with a valid PEC.
pub fn packet(apid: u16, seq: u16, service: (u8, u8), obt: i64, data: &[u8]) -> Vec<u8> {
    let len = 16 + data.len() + 2;
    let mut dat = Vec::with_capacity(len);
    dat.extend_from_slice(&(0x0800 | apid).to_be_bytes());
    dat.extend_from_slice(&(0xC000 | seq).to_be_bytes());
    dat.extend_from_slice(&((len - 7) as u16).to_be_bytes());
    dat.extend_from_slice(&[0x10, service.0, service.1, 0x00]);
    dat.extend_from_slice(&obt.to_be_bytes()[2..]);
    dat.extend_from_slice(data);
    let crc = pec(&dat);
    dat.extend_from_slice(&crc.to_be_bytes());
    dat
}

/// Split a packet stream over frames of [FRAME_LEN] bytes, zero filling the
/// last one.
pub fn frames(vcid: Vcid, packets: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let data_len = FRAME_LEN - 10;
    let mut stream = Vec::new();
    let mut starts = Vec::new();
    for p in packets {
        starts.push(stream.len());
        stream.extend_from_slice(p);
    }
    let mut frames = Vec::new();
    for (count, chunk) in stream.chunks(data_len).enumerate() {
        let offset = count * data_len;
        let fhp = starts
            .iter()
            .find(|s| **s >= offset && **s < offset + data_len)
            .map_or(0x7ff, |s| (s - offset) as u16);
        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.extend_from_slice(&((CHEOPS_SCID << 4) | (u16::from(vcid) << 1)).to_be_bytes());
        frame.push(count as u8);
        frame.push(count as u8);
        frame.extend_from_slice(&(0x9800 | fhp).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(chunk);
        frame.resize(FRAME_LEN, 0);
        frames.push(frame);
    }
    frames
}

/// Wrap frames into NCTRS data units with the CHEOPS frame layout.
pub fn nctrs(vcid: Vcid, frames: &[Vec<u8>]) -> Vec<u8> {
    let layout = FrameLayout::CHEOPS;
    let mut dat = Vec::new();
    for frame in frames {
        let size = NctrsHeader::LEN + layout.asm_len + frame.len() + layout.trailer_len;
        dat.extend_from_slice(&(size as u32).to_be_bytes());
        dat.extend_from_slice(&CHEOPS_SCID.to_be_bytes());
        dat.push(0);
        dat.push(vcid);
        dat.extend_from_slice(&0u16.to_be_bytes());
        dat.extend_from_slice(&0u64.to_be_bytes());
        dat.extend_from_slice(&[1, 0]);
        dat.extend_from_slice(&[0x1a, 0xcf, 0xfc, 0x1d]);
        dat.extend_from_slice(frame);
        dat.resize(dat.len() + layout.trailer_len, 0);
    }
    dat
}
