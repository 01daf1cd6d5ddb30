//! CCSDS telemetry as produced by the CHEOPS spacecraft: NCTRS data units,
//! TM transfer frames, PUS source packets and packet reassembly.
mod crc;
mod extractor;
mod fields;
mod frame;
mod nctrs;
mod packet;
mod summary;

pub use crc::pec;
pub use extractor::{
    extract_packets, ExtractedPacket, ExtractedPackets, ExtractionSummary, PacketExtractor,
};
pub use fields::FieldReader;
pub use frame::{Frame, FrameHeader, Scid, Vcid, CHEOPS_SCID, VC_EVENTS, VC_HK, VC_SCIENCE};
pub use nctrs::{read_nctrs, FrameLayout, NctrsHeader, NctrsIter, NctrsUnit};
pub use packet::{
    missing_packets, read_packets, Apid, DataFieldHeader, PacketReaderIter, PrimaryHeader,
    TmPacket, SEQ_CONTINUATION, SEQ_FIRST, SEQ_LAST, SEQ_UNSEGMENTED,
};
pub use summary::{ApidSummary, PacketSummary};
