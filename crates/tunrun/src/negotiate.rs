//! # Version Probe Handler
//!
//! Answers the protocol version probe on any exchange that carries it, then
//! continues the chain. Stateless and idempotent.

use bytes::Bytes;
use http::HeaderValue;
use http::Request;
use http::Response;
use tunrpc::version::LATEST_VERSION;
use tunrpc::version::PROTOCOL_VERSION_HEADER;

use crate::http::HttpHandler;

pub struct ProtocolVersionHandler<H> {
    next: H,
}

impl<H: HttpHandler> ProtocolVersionHandler<H> {
    pub fn new(next: H) -> Self {
        Self { next }
    }
}

#[async_trait::async_trait]
impl<H: HttpHandler> HttpHandler for ProtocolVersionHandler<H> {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let probed = request.headers().contains_key(PROTOCOL_VERSION_HEADER);
        let mut response = self.next.handle(request).await;
        if probed {
            // always our own latest; the caller downgrades
            response
                .headers_mut()
                .insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static(LATEST_VERSION.as_header_value()));
        }
        response
    }
}
