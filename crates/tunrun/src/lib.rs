//! # TunRun
//!
//! The async runtime around `tunrpc`: server handlers for invocations,
//! cancellations and transaction primitives, plus the client side that talks
//! to them over any `HttpTransport`.
//!
//! ## Architecture
//!
//! - **Server**: `PathRouter` mounts `InvocationHandler`, `CancelHandler` and
//!   `TransactionHandler` under one service root. `ProtocolVersionHandler` wraps
//!   the router and answers the version probe.
//! - **Client**: `HttpTargetContext` holds the service root, transport and
//!   negotiated version. `InvocationClient` and `HttpSubordinateTransactionHandle`
//!   build exchanges on top of it.
//! - **Seams**: components are reached through `Association`, transactions
//!   through `TransactionManager` and `XaTerminator`.

pub mod association;
pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod http;
pub mod loopback;
pub mod negotiate;
pub mod subordinate;
pub mod transaction;
pub mod transport;
pub mod txn_service;
pub mod worker;

pub use association::Association;
pub use association::Invocable;
pub use association::InvocationOutcome;
pub use cancel::CancelHandler;
pub use cancel::CancellationRegistry;
pub use client::InvocationClient;
pub use config::ServiceConfig;
pub use context::HttpTargetContext;
pub use dispatcher::InvocationHandler;
pub use crate::http::HttpHandler;
pub use crate::http::PathRouter;
pub use loopback::LoopbackTransport;
pub use negotiate::ProtocolVersionHandler;
pub use subordinate::HttpSubordinateTransactionHandle;
pub use transport::HttpTransport;
pub use transport::TransportError;
pub use txn_service::TransactionHandler;

#[cfg(test)]
mod tests;
