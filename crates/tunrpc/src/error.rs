//! # Error Definitions
//!
//! Every way a tunnelled message can fail to be understood.

use tunpack::Error as PackError;

/// Protocol-level failures: the bytes or strings did not form a valid message.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying codec failed (truncated input, bad tag, refused class, ...).
    Codec(PackError),
    /// A content type header was missing, unparsable, or of the wrong type or version.
    InvalidContentType(String),
    /// The invocation path had fewer than the required segments.
    PathTooShort(usize),
    /// The invocation path was long enough but a segment could not be decoded.
    MalformedPath(String),
    /// A transaction branch identifier violated its length limits.
    InvalidXid(String),
    /// The transaction descriptor marker byte was not recognised.
    UnknownTransactionMarker(u8),
    /// The message structure was otherwise malformed.
    ProtocolViolation(String),
}

impl Error {
    /// True when decoding was refused by a class filter rather than failing on malformed data.
    pub fn is_security(&self) -> bool {
        matches!(self, Error::Codec(e) if e.is_security())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "Codec error: {}", e),
            Self::InvalidContentType(ct) => write!(f, "Invalid content type: {}", ct),
            Self::PathTooShort(n) => write!(f, "Invocation path has {} segments, at least 7 required", n),
            Self::MalformedPath(msg) => write!(f, "Malformed invocation path: {}", msg),
            Self::InvalidXid(msg) => write!(f, "Invalid Xid: {}", msg),
            Self::UnknownTransactionMarker(b) => write!(f, "Unknown transaction marker: {:#04x}", b),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self { Self::Codec(e) }
}

/// A specialized Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
