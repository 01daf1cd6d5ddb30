use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use super::{Frame, PrimaryHeader, TmPacket, Vcid};
use crate::{Error, Result};

/// Counters maintained by a [PacketExtractor].
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub vcid: Vcid,
    pub frames: u64,
    pub extracted: u64,
    pub missing_frames: u64,
    pub lost_packets: u64,
}

/// Reassembles source packets from the frames of a single virtual channel.
///
/// Frames must be added in reception order. Packets fully contained in a frame
/// are reported with `reconstructed = false`, packets spanning several frames
/// with `reconstructed = true`.
///
/// ```
/// use cheops::telemetry::{Frame, PacketExtractor};
///
/// let mut frame = vec![0u8; 1115];
/// // VC 1 with OCF, first header pointer 0, idle data only
/// frame[..6].copy_from_slice(&[0x00, 0x03, 0x01, 0x01, 0x98, 0x00]);
/// let frame = Frame::decode(&frame).unwrap();
///
/// let mut extractor = PacketExtractor::new(1);
/// extractor.add(&frame, |_packet, _reconstructed| {}).unwrap();
/// extractor.end();
/// assert_eq!(extractor.summary().frames, 1);
/// assert_eq!(extractor.summary().lost_packets, 0);
/// ```
#[derive(Debug)]
pub struct PacketExtractor {
    vcid: Vcid,
    expected_vc_count: u8,
    /// Bytes of a packet that started in a previous frame.
    partial: Vec<u8>,
    summary: ExtractionSummary,
}

impl PacketExtractor {
    #[must_use]
    pub fn new(vcid: Vcid) -> Self {
        PacketExtractor {
            vcid,
            expected_vc_count: 0,
            partial: Vec::new(),
            summary: ExtractionSummary {
                vcid,
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn vcid(&self) -> Vcid {
        self.vcid
    }

    #[must_use]
    pub fn summary(&self) -> ExtractionSummary {
        self.summary
    }

    fn lose_partial(&mut self) {
        self.partial.clear();
        self.summary.lost_packets += 1;
    }

    /// Add the next frame of the virtual channel, calling `on_packet` for each
    /// packet completed by this frame.
    ///
    /// # Errors
    /// [Error::WrongVirtualChannel] if the frame belongs to another virtual channel.
    pub fn add<F>(&mut self, frame: &Frame, mut on_packet: F) -> Result<()>
    where
        F: FnMut(&[u8], bool),
    {
        if frame.header.vcid != self.vcid {
            return Err(Error::WrongVirtualChannel {
                expected: self.vcid,
                actual: frame.header.vcid,
            });
        }
        self.summary.frames += 1;

        let vc_count = frame.header.vc_count;
        if self.summary.frames == 1 {
            self.expected_vc_count = vc_count;
        }
        let mut missed_frame = false;
        if vc_count != self.expected_vc_count {
            let missed = vc_count.wrapping_sub(self.expected_vc_count);
            self.summary.missing_frames += u64::from(missed);
            missed_frame = true;
            warn!(
                vcid = self.vcid,
                "Missing {missed} frame(s) between counter {} and {vc_count}",
                self.expected_vc_count.wrapping_sub(1)
            );
            if !self.partial.is_empty() {
                self.lose_partial();
            }
        }
        self.expected_vc_count = vc_count.wrapping_add(1);

        let fhp = frame.header.fhp;
        if fhp == Frame::FHP_IDLE {
            trace!(vcid = self.vcid, vc_count, "idle frame");
            return Ok(());
        }

        let mut data = frame.data();
        if fhp == 0 && !self.partial.is_empty() {
            if !missed_frame {
                error!(
                    vcid = self.vcid,
                    "CCSDS Frame protocol violation: expected remaining bytes of packet started in previous frame, but got FHP=0 (VCFC={vc_count})"
                );
            }
            self.lose_partial();
        } else if fhp != 0 && self.partial.is_empty() {
            // End of a packet whose start we never saw. Losses after a gap
            // were already counted above.
            if !missed_frame {
                let message = format!(
                    "CCSDS Frame protocol violation in frame #{}: expected FHP=0 but got FHP={fhp} (VCFC={vc_count})",
                    self.summary.frames
                );
                if self.summary.frames == 1 {
                    info!(vcid = self.vcid, "{message}");
                } else {
                    self.summary.lost_packets += 1;
                    error!(vcid = self.vcid, "{message}");
                }
            }
            data = if fhp == Frame::FHP_NO_PACKET_START {
                &[]
            } else {
                &data[(fhp as usize).min(data.len())..]
            };
        } else if !self.partial.is_empty() {
            let count = if fhp == Frame::FHP_NO_PACKET_START {
                data.len()
            } else {
                (fhp as usize).min(data.len())
            };
            self.partial.extend_from_slice(&data[..count]);
            data = &data[count..];

            let mut complete = false;
            let mut packet_len = 0;
            if let Some(header) = PrimaryHeader::decode(&self.partial) {
                if self.partial.len() >= TmPacket::MIN_LEN {
                    packet_len = header.packet_len();
                    if self.partial.len() >= packet_len {
                        on_packet(&self.partial[..packet_len], true);
                        self.summary.extracted += 1;
                        complete = true;
                        self.partial.clear();
                    }
                }
            }
            if !complete && fhp != Frame::FHP_NO_PACKET_START {
                if packet_len > 0 {
                    error!(
                        vcid = self.vcid,
                        "CCSDS Frame protocol violation: missing {} bytes to reconstruct packet of {packet_len} bytes (VCFC={vc_count})",
                        packet_len - self.partial.len()
                    );
                } else {
                    error!(
                        vcid = self.vcid,
                        "CCSDS Frame protocol violation: missing bytes to reconstruct packet, only had {} bytes (VCFC={vc_count})",
                        self.partial.len()
                    );
                }
                self.lose_partial();
            }
        }

        while !data.is_empty() {
            if data.len() >= TmPacket::MIN_LEN {
                // length checked, decode can't fail
                let header = PrimaryHeader::decode(data).ok_or(Error::NotEnoughData {
                    actual: data.len(),
                    minimum: PrimaryHeader::LEN,
                })?;
                let packet_len = header.packet_len();
                if packet_len == TmPacket::MIN_LEN && data[5] == 0 && data[6] == 0 {
                    info!(
                        vcid = self.vcid,
                        "Found idle data in frame, ignoring remaining bytes (VCFC={vc_count})"
                    );
                    break;
                }
                if packet_len <= data.len() {
                    on_packet(&data[..packet_len], false);
                    self.summary.extracted += 1;
                    data = &data[packet_len..];
                    continue;
                }
            }
            // packet continues in the next frame
            self.partial.clear();
            self.partial.extend_from_slice(data);
            break;
        }
        Ok(())
    }

    /// Signal the end of the frame stream. A packet still being reconstructed
    /// is counted as lost unless it is only fill.
    pub fn end(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let non_zero = self.partial.iter().any(|b| *b != 0);
        let idle_start =
            self.partial[0] == 0x07 && (self.partial.len() < 2 || self.partial[1] == 0xff);
        if non_zero && !idle_start {
            warn!(
                vcid = self.vcid,
                "Packet extraction ended with incomplete packet being reconstructed (got {} bytes)",
                self.partial.len()
            );
            self.summary.lost_packets += 1;
        } else {
            debug!(vcid = self.vcid, "dropping trailing fill");
        }
        self.partial.clear();
    }
}

/// A packet produced by [extract_packets].
#[derive(Debug, Clone)]
pub struct ExtractedPacket {
    pub packet: TmPacket,
    pub reconstructed: bool,
}

/// Iterator adapter returned by [extract_packets].
pub struct ExtractedPackets<I>
where
    I: Iterator<Item = Frame>,
{
    frames: I,
    extractor: PacketExtractor,
    ready: VecDeque<ExtractedPacket>,
    ended: bool,
}

impl<I> ExtractedPackets<I>
where
    I: Iterator<Item = Frame>,
{
    /// Counters so far; final once the iterator is exhausted.
    #[must_use]
    pub fn summary(&self) -> ExtractionSummary {
        self.extractor.summary()
    }
}

impl<I> Iterator for ExtractedPackets<I>
where
    I: Iterator<Item = Frame>,
{
    type Item = ExtractedPacket;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Some(packet);
            }
            if self.ended {
                return None;
            }
            let Some(frame) = self.frames.next() else {
                self.extractor.end();
                self.ended = true;
                continue;
            };
            if frame.header.vcid != self.extractor.vcid() {
                continue;
            }
            let ready = &mut self.ready;
            let result = self.extractor.add(&frame, |dat, reconstructed| {
                match TmPacket::decode(dat) {
                    Ok(packet) => ready.push_back(ExtractedPacket {
                        packet,
                        reconstructed,
                    }),
                    Err(err) => debug!("dropping undecodable packet: {err}"),
                }
            });
            if let Err(err) = result {
                debug!("frame not added: {err}");
            }
        }
    }
}

/// Extract the packets of virtual channel `vcid` from `frames`. Frames of other
/// virtual channels are skipped.
pub fn extract_packets<I>(frames: I, vcid: Vcid) -> ExtractedPackets<I>
where
    I: Iterator<Item = Frame>,
{
    ExtractedPackets {
        frames,
        extractor: PacketExtractor::new(vcid),
        ready: VecDeque::new(),
        ended: false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FRAME_LEN: usize = 1115;

    fn frame(head: &[u8]) -> Frame {
        let mut dat = vec![0u8; FRAME_LEN];
        dat[..head.len()].copy_from_slice(head);
        Frame::decode(&dat).unwrap()
    }

    fn set_counts(f: &mut Frame, count: u8) {
        f.bytes[2] = count;
        f.bytes[3] = count;
        f.header.mc_count = count;
        f.header.vc_count = count;
    }

    #[derive(Default)]
    struct Collected {
        packets: Vec<Vec<u8>>,
    }

    impl Collected {
        fn add(&mut self, extractor: &mut PacketExtractor, f: &Frame) {
            extractor
                .add(f, |dat, _| self.packets.push(dat.to_vec()))
                .unwrap();
        }
    }

    #[test]
    fn wrong_virtual_channel() {
        let mut extractor = PacketExtractor::new(2);
        let f = frame(&[0x00, 0x03, 0xAB, 0xCD, 0x98, 0x00, 0x03]);
        let err = extractor.add(&f, |_, _| {}).unwrap_err();
        assert!(matches!(
            err,
            Error::WrongVirtualChannel {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn missing_frames() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let mut idle = frame(&[0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        got.add(&mut extractor, &idle);
        set_counts(&mut idle, 2);
        got.add(&mut extractor, &idle);
        assert_eq!(extractor.summary().missing_frames, 0);
        assert_eq!(extractor.summary().lost_packets, 0);

        set_counts(&mut idle, 4);
        got.add(&mut extractor, &idle);
        assert_eq!(extractor.summary().missing_frames, 1);
        assert_eq!(extractor.summary().lost_packets, 0);

        // start of a packet larger than the frame
        #[rustfmt::skip]
        let big = frame(&[
            0x00, 0x03, 0x05, 0x05, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x04, 0x48, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        got.add(&mut extractor, &big);
        assert_eq!(extractor.summary().lost_packets, 0);

        // two frames missed, the packet end was in them
        set_counts(&mut idle, 8);
        got.add(&mut extractor, &idle);
        extractor.end();
        let summary = extractor.summary();
        assert_eq!(got.packets.len(), 0);
        assert_eq!(summary.lost_packets, 1);
        assert_eq!(summary.missing_frames, 3);
        assert_eq!(summary.extracted, 0);
    }

    #[test]
    fn fhp_zero_while_reconstructing() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let start = frame(&[
            0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x04, 0x48, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        got.add(&mut extractor, &start);
        assert_eq!(extractor.summary().lost_packets, 0);

        let idle = frame(&[0x00, 0x03, 0x02, 0x02, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        got.add(&mut extractor, &idle);
        assert_eq!(got.packets.len(), 0);
        assert_eq!(extractor.summary().lost_packets, 1);
        assert_eq!(extractor.summary().missing_frames, 0);
    }

    #[test]
    fn fhp_non_zero_without_start() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let mut f = frame(&[
            0x00, 0x03, 0xAB, 0xCD, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x00, 0x0B, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE5, 0x5C,
        ]);
        got.add(&mut extractor, &f);
        assert_eq!(got.packets.len(), 1);
        assert_eq!(extractor.summary().lost_packets, 0);

        f.bytes[5] = 0xff;
        f.bytes[2] += 1;
        f.bytes[3] += 1;
        let f = Frame::decode(&f.bytes).unwrap();
        got.add(&mut extractor, &f);
        assert_eq!(got.packets.len(), 1);
        assert_eq!(extractor.summary().lost_packets, 1);

        let mut dat = f.bytes.clone();
        dat[4] = 0x9f;
        dat[5] = 0xff;
        dat[2] += 1;
        dat[3] += 1;
        got.add(&mut extractor, &Frame::decode(&dat).unwrap());
        assert_eq!(got.packets.len(), 1);
        assert_eq!(extractor.summary().lost_packets, 2);
        assert_eq!(extractor.summary().missing_frames, 0);
        assert_eq!(extractor.summary().extracted, 1);
    }

    #[test]
    fn packet_spanning_three_frames() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let first = frame(&[
            0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x08, 0x95, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        let middle = frame(&[0x00, 0x03, 0x02, 0x02, 0x9F, 0xFF, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let last = frame(&[0x00, 0x03, 0x03, 0x03, 0x98, 0x02, 0x03, 0x00, 0x00, 0x00, 0x64, 0x00]);

        got.add(&mut extractor, &first);
        got.add(&mut extractor, &middle);
        got.add(&mut extractor, &last);
        extractor.end();

        assert_eq!(got.packets.len(), 1);
        assert_eq!(got.packets[0].len(), 0x0895 + 7);
        let summary = extractor.summary();
        assert_eq!(summary.extracted, 1);
        assert_eq!(summary.lost_packets, 0);
        assert_eq!(summary.missing_frames, 0);
    }

    #[test]
    fn packet_end_missing() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let first = frame(&[
            0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x08, 0x95, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        let short = frame(&[0x00, 0x03, 0x02, 0x02, 0x98, 0x02, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        got.add(&mut extractor, &first);
        got.add(&mut extractor, &short);
        extractor.end();

        assert_eq!(got.packets.len(), 0);
        assert_eq!(extractor.summary().lost_packets, 1);
    }

    #[test]
    fn next_packet_start_too_small() {
        let mut extractor = PacketExtractor::new(1);
        let mut got = Collected::default();

        #[rustfmt::skip]
        let mut first = frame(&[
            0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x04, 0x44, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        first.bytes[1107] = 0xD0;
        first.bytes[1108] = 0xA6;
        let short = frame(&[0x00, 0x03, 0x02, 0x02, 0x98, 0x02, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        got.add(&mut extractor, &first);
        got.add(&mut extractor, &short);
        extractor.end();

        assert_eq!(got.packets.len(), 1);
        assert_eq!(extractor.summary().lost_packets, 1);
        assert_eq!(extractor.summary().missing_frames, 0);
        assert_eq!(extractor.summary().extracted, 1);
    }

    #[test]
    fn trailing_idle_start_is_not_lost() {
        let mut extractor = PacketExtractor::new(1);
        // a full packet followed by the first two bytes of an idle packet
        let mut dat = vec![0u8; 10 + 20 + 4];
        dat[..6].copy_from_slice(&[0x00, 0x03, 0x00, 0x00, 0x98, 0x00]);
        let mut packet = vec![0x08, 0x00, 0xC0, 0x00, 0x00, 0x0B, 0x10, 0x01, 0x01, 0x00];
        packet.extend([0u8; 6]);
        packet.extend([0xE5, 0x5C]);
        dat[10..28].copy_from_slice(&packet);
        dat[28] = 0x07;
        dat[29] = 0xff;
        let f = Frame::decode(&dat).unwrap();

        let mut count = 0;
        extractor.add(&f, |_, reconstructed| {
            assert!(!reconstructed);
            count += 1;
        }).unwrap();
        extractor.end();
        assert_eq!(count, 1);
        assert_eq!(extractor.summary().lost_packets, 0);
    }

    #[test]
    fn iterator_adapter() {
        #[rustfmt::skip]
        let first = frame(&[
            0x00, 0x03, 0x01, 0x01, 0x98, 0x00, 0x03, 0x00, 0x00, 0x00,
            0x08, 0x00, 0xC0, 0x00, 0x08, 0x95, 0x10, 0x01, 0x01, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ]);
        let other_vc = frame(&[0x00, 0x07, 0x01, 0x01, 0x9F, 0xFF]);
        let middle = frame(&[0x00, 0x03, 0x02, 0x02, 0x9F, 0xFF, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let last = frame(&[0x00, 0x03, 0x03, 0x03, 0x98, 0x02, 0x03, 0x00, 0x00, 0x00, 0x64, 0x00]);

        let mut packets = extract_packets(vec![first, other_vc, middle, last].into_iter(), 1);
        let got: Vec<ExtractedPacket> = packets.by_ref().collect();
        assert_eq!(got.len(), 1);
        assert!(got[0].reconstructed);
        assert_eq!(got[0].packet.header.apid, 0);
        assert_eq!(packets.summary().frames, 3);
    }
}
