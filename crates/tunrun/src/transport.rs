//! # HTTP Transport
//!
//! The client's only view of the network: one request out, one response back.
//!
//! ## Philosophy
//!
//! - **Opaque Bodies**: The transport moves whole `http` messages. It knows
//!   nothing about invocations, Xids or marshalled objects.
//! - **Statuses Are Answers**: Any response the peer produced, 4xx and 5xx
//!   included, is `Ok`. `TransportError` means no response exists at all.

use bytes::Bytes;
use http::Request;
use http::Response;

/// The exchange never produced a response.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The service could not be reached or hung up mid-exchange.
    ConnectionLost(String),
    /// No response arrived within the transport's own deadline.
    Timeout,
    /// Any other failure below HTTP.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection to service lost: {}", msg),
            Self::Timeout => write!(f, "No response before the transport deadline"),
            Self::Io(msg) => write!(f, "Transport I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Sends an HTTP request and yields the peer's response.
///
/// Object-safe; held as `Arc<dyn HttpTransport>`.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// # invariants
    /// - Returns `Ok(response)` for every response received, whatever its status.
    /// - Returns `Err` only if no response could be obtained.
    /// - Never interprets the body.
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>>;
}
