use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{missing_packets, Apid, PrimaryHeader, TmPacket};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ApidSummary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub invalid: usize,
    /// Packet counts keyed by `"type,subtype"`.
    pub services: BTreeMap<String, usize>,
}

/// Tracks stats on extracted packets.
///
/// # Example
/// ```
/// use cheops::telemetry::{PacketSummary, TmPacket};
///
/// #[rustfmt::skip]
/// let dat: &[u8] = &[
///     0x08, 0x00, 0xC0, 0x00, 0x00, 0x0B, 0x10, 0x01, 0x01, 0x00,
///     0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE5, 0x5C,
/// ];
/// let mut summary = PacketSummary::default();
/// summary.add(&TmPacket::decode(dat).unwrap());
/// assert_eq!(summary.count, 1);
/// assert_eq!(summary.invalid, 0);
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PacketSummary {
    pub count: usize,
    pub bytes: usize,
    pub missing: usize,
    pub invalid: usize,
    pub apids: BTreeMap<Apid, ApidSummary>,

    #[serde(skip)]
    seen_headers: HashMap<Apid, PrimaryHeader>,
}

impl PacketSummary {
    pub fn add(&mut self, packet: &TmPacket) {
        self.count += 1;
        self.bytes += packet.bytes.len();

        let hdr = packet.header;
        let apid = self.apids.entry(hdr.apid).or_default();
        apid.count += 1;
        apid.bytes += packet.bytes.len();
        if packet.validate().is_err() {
            apid.invalid += 1;
            self.invalid += 1;
        }
        if let Some(service) = packet.service() {
            *apid
                .services
                .entry(format!("{},{}", service.service_type, service.service_subtype))
                .or_default() += 1;
        }

        if let Some(last_hdr) = self.seen_headers.get(&hdr.apid) {
            let missing = missing_packets(hdr.sequence_count, last_hdr.sequence_count) as usize;
            apid.missing += missing;
            self.missing += missing;
        }
        self.seen_headers.insert(hdr.apid, hdr);
    }
}
