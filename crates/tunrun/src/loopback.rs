//! In-process transport that hands requests straight to a server handler.

use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use http::Response;

use crate::http::HttpHandler;
use crate::transport;
use crate::transport::HttpTransport;
use crate::transport::TransportError;

/// Connects a client to an `HttpHandler` without a network in between.
///
/// The handler sees the path relative to the service root, as a server mounted
/// at `root` would.
pub struct LoopbackTransport {
    root: String,
    handler: Arc<dyn HttpHandler>,
}

impl LoopbackTransport {
    pub fn new(root: impl Into<String>, handler: impl HttpHandler) -> Self {
        Self { root: root.into().trim_end_matches('/').to_string(), handler: Arc::new(handler) }
    }
}

#[async_trait::async_trait]
impl HttpTransport for LoopbackTransport {
    async fn send(&self, mut request: Request<Bytes>) -> transport::Result<Response<Bytes>> {
        let uri = request.uri().to_string();
        let Some(rest) = uri.strip_prefix(self.root.as_str()) else {
            return Err(TransportError::ConnectionLost(format!("no route to {}", uri)));
        };
        let rest = if rest.starts_with('/') { rest.to_string() } else { format!("/{}", rest) };
        *request.uri_mut() = rest.parse().map_err(|e| TransportError::Io(format!("bad uri {}: {}", rest, e)))?;
        Ok(self.handler.handle(request).await)
    }
}
