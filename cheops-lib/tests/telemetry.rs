mod common;

use std::fs::{self, File};
use std::io::BufReader;

use cheops::telemetry::{
    extract_packets, read_nctrs, read_packets, FrameLayout, PacketSummary, TmPacket, VC_EVENTS,
    VC_HK,
};

use common::{frames, nctrs, packet};

fn hk_packets(count: u16) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            packet(
                972,
                i,
                (3, 25),
                2_000_000_000_000 + i64::from(i) * 65536,
                &[0, 1, 0, i as u8, 0xaa, 0xbb],
            )
        })
        .collect()
}

#[test]
fn extract_from_nctrs_file() {
    let tmpdir = tempfile::tempdir().unwrap();
    let path = tmpdir.path().join("pass.nctrs");
    let packets = hk_packets(10);
    fs::write(&path, nctrs(VC_HK, &frames(VC_HK, &packets))).unwrap();

    let reader = BufReader::new(File::open(&path).unwrap());
    let frames = read_nctrs(reader)
        .map(Result::unwrap)
        .map(|unit| unit.frame(FrameLayout::CHEOPS).unwrap());
    let mut extracted = extract_packets(frames, VC_HK);
    let got: Vec<_> = extracted.by_ref().collect();

    assert_eq!(got.len(), packets.len());
    for (idx, (got, expected)) in got.iter().zip(&packets).enumerate() {
        assert_eq!(&got.packet.bytes, expected, "packet {idx} differs");
        got.packet.validate().unwrap();
    }
    // 24 byte packets in 54 byte data fields, most span two frames
    assert!(got.iter().any(|p| p.reconstructed));
    let summary = extracted.summary();
    assert_eq!(summary.extracted, 10);
    assert_eq!(summary.lost_packets, 0);
    assert_eq!(summary.missing_frames, 0);
}

#[test]
fn other_virtual_channels_are_skipped() {
    let mut dat = nctrs(VC_EVENTS, &frames(VC_EVENTS, &hk_packets(3)));
    dat.extend(nctrs(VC_HK, &frames(VC_HK, &hk_packets(2))));

    let frames = read_nctrs(dat.as_slice())
        .map(Result::unwrap)
        .map(|unit| unit.frame(FrameLayout::CHEOPS).unwrap());
    let got: Vec<_> = extract_packets(frames, VC_HK).collect();
    assert_eq!(got.len(), 2);
}

#[test]
fn missing_frame_loses_spanning_packet() {
    let mut frames = frames(VC_HK, &hk_packets(6));
    frames.remove(1);
    let dat = nctrs(VC_HK, &frames);

    let frames = read_nctrs(dat.as_slice())
        .map(Result::unwrap)
        .map(|unit| unit.frame(FrameLayout::CHEOPS).unwrap());
    let mut extracted = extract_packets(frames, VC_HK);
    let got: Vec<_> = extracted.by_ref().collect();

    let summary = extracted.summary();
    assert_eq!(summary.missing_frames, 1);
    assert!(summary.lost_packets >= 1);
    assert!(got.len() < 6);
    for p in &got {
        p.packet.validate().unwrap();
    }
}

#[test]
fn packet_file_summary() {
    let mut dat: Vec<u8> = hk_packets(4).concat();
    let mut other = packet(1000, 7, (1, 1), 0, &[1, 2, 3]);
    // corrupt the PEC
    let n = other.len();
    other[n - 1] ^= 0xff;
    dat.extend(other);

    let mut summary = PacketSummary::default();
    let packets: Vec<TmPacket> = read_packets(dat.as_slice()).map(Result::unwrap).collect();
    for p in &packets {
        summary.add(p);
    }
    assert_eq!(summary.count, 5);
    assert_eq!(summary.apids.len(), 2);
    assert_eq!(summary.apids[&972].count, 4);
    assert_eq!(summary.apids[&1000].invalid, 1);
    assert_eq!(summary.invalid, 1);
}

#[test]
fn known_packet_from_hex() {
    let dat = hex::decode("0800c000000b10010100000000000000e55c").unwrap();
    let packet = TmPacket::decode(&dat).unwrap();
    packet.validate().unwrap();
    assert_eq!(packet.header.apid, 0);
    assert_eq!(packet.service().unwrap().service_subtype, 1);
    assert_eq!(hex::encode(packet.pec().to_be_bytes()), "e55c");
}
