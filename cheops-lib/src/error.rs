use crate::fits::FitsError;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("Not enough bytes")]
    NotEnoughData { actual: usize, minimum: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A transfer frame header field has a value not allowed for CHEOPS frames.
    #[error("invalid transfer frame: {0}")]
    InvalidFrame(String),
    /// A source packet failed header or checksum validation.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
    #[error("frame of VC {actual} passed to packet extractor of VC {expected}")]
    WrongVirtualChannel { expected: u8, actual: u8 },
    #[error("invalid NCTRS data unit: {0}")]
    InvalidNctrs(String),

    /// A time value could not be parsed or is out of range.
    #[error("{0}")]
    Time(String),
    /// Time reference data (leap seconds, resets, correlation) missing or invalid.
    #[error("time reference: {0}")]
    TimeReference(String),
    #[error("{0}")]
    Obt(String),

    /// A pass or visit identifier out of range or malformed.
    #[error("{0}")]
    InvalidId(String),
    #[error("{0}")]
    ReferenceFile(String),
    #[error("orbit interpolation: {0}")]
    Orbit(String),
    #[error("HK processing: {0}")]
    Hk(String),

    #[error("job order: {0}")]
    JobOrder(String),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Fits(#[from] FitsError),
}

pub type Result<T> = std::result::Result<T, Error>;
