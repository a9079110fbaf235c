//! # TunRPC
//!
//! The wire protocol for tunnelling component invocations and subordinate
//! transaction branches over HTTP.
//!
//! ## Architecture
//!
//! This crate is pure: it turns addresses, payloads and transaction identifiers
//! into bytes and strings and back, on top of a pluggable `tunpack` codec.
//! It performs no I/O and holds no per-request state; the `tunrun` crate drives it.
//!
//! - `path`: the slash-delimited invocation address.
//! - `frame`: invocation request/response payloads and attachments.
//! - `xid`: transaction branch identifiers and the optional transaction descriptor.
//! - `exception`: marshalled failures a remote caller can reconstruct.
//! - `xa`: the XA outcome-code taxonomy.
//! - `version`: protocol version negotiation and namespace translation.

pub mod constants;
pub mod content_type;
pub mod error;
pub mod exception;
pub mod frame;
pub mod path;
pub mod table;
pub mod version;
pub mod xa;
pub mod xid;

pub use content_type::ContentType;
pub use error::Error;
pub use error::Result;
pub use exception::RemoteException;
pub use frame::Attachments;
pub use frame::InvocationRequest;
pub use frame::InvocationResponse;
pub use path::InvocationPath;
pub use table::ProtocolV1ObjectTable;
pub use version::ConnectionVersion;
pub use version::ProtocolVersion;
pub use xa::PrepareOutcome;
pub use xa::XaError;
pub use xid::TransactionDescriptor;
pub use xid::Xid;
