//! # Target Context
//!
//! Client-side state for one remote service: where it lives, how to reach it,
//! and the protocol version negotiated with it.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use http::Request;
use http::Response;
use http::header;
use tunpack::ClassResolver;
use tunpack::DefaultClassResolver;
use tunpack::Marshaller;
use tunpack::MarshallerFactory;
use tunpack::PackFactory;
use tunpack::Unmarshaller;
use tunrpc::ContentType;
use tunrpc::ConnectionVersion;
use tunrpc::ProtocolV1ObjectTable;
use tunrpc::ProtocolVersion;
use tunrpc::RemoteException;
use tunrpc::constants;
use tunrpc::version::NamespaceTranslatingResolver;
use tunrpc::version::PROTOCOL_VERSION_HEADER;

use crate::http::header_str;
use crate::transport;
use crate::transport::HttpTransport;

pub struct HttpTargetContext {
    root: String,
    transport: Arc<dyn HttpTransport>,
    factory: Arc<dyn MarshallerFactory>,
    version: ConnectionVersion,
}

impl HttpTargetContext {
    /// `root` is the service root, e.g. `http://host:8080/wildfly-services`.
    pub fn new(root: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            transport,
            factory: Arc::new(PackFactory),
            version: ConnectionVersion::default(),
        }
    }

    pub fn with_marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Caps the version this side offers.
    pub fn with_local_version(mut self, local: ProtocolVersion) -> Self {
        self.version = ConnectionVersion::new(local);
        self
    }

    pub fn version(&self) -> &ConnectionVersion {
        &self.version
    }

    pub fn uri(&self, path: &str) -> String {
        format!("{}{}", self.root, path)
    }

    fn resolver(&self) -> Arc<dyn ClassResolver> {
        if self.version.current().is_legacy() {
            Arc::new(NamespaceTranslatingResolver::new(Arc::new(DefaultClassResolver)))
        } else {
            Arc::new(DefaultClassResolver)
        }
    }

    pub fn marshaller(&self) -> Box<dyn Marshaller> {
        self.factory.create_marshaller(self.resolver(), Arc::new(ProtocolV1ObjectTable))
    }

    pub fn unmarshaller(&self, input: Vec<u8>) -> Box<dyn Unmarshaller> {
        self.factory.create_unmarshaller(self.resolver(), Arc::new(ProtocolV1ObjectTable), input)
    }

    /// Sends one exchange, attaching the version header and pinning the version
    /// from the first response.
    pub async fn send(&self, mut request: Request<Bytes>) -> transport::Result<Response<Bytes>> {
        let (name, value) = self.version.request_header();
        request.headers_mut().insert(name, HeaderValue::from_static(value));

        let probing = self.version.is_probing();
        let response = self.transport.send(request).await?;
        if probing {
            let pinned = self.version.observe(header_str(response.headers(), PROTOCOL_VERSION_HEADER));
            tracing::debug!(root = %self.root, version = %pinned, "protocol version pinned");
        }
        Ok(response)
    }

    /// Decodes the marshalled exception carried by `response`, if it carries one.
    pub fn read_exception(&self, response: &Response<Bytes>) -> Option<RemoteException> {
        let content_type = header_str(response.headers(), header::CONTENT_TYPE.as_str())?;
        let parsed = ContentType::parse(content_type).ok()?;
        if !constants::EXCEPTION.matches(&parsed) {
            return None;
        }
        let mut input = self.unmarshaller(response.body().to_vec());
        match RemoteException::read_from(input.as_mut()) {
            Ok(exception) => Some(exception),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable exception body");
                None
            }
        }
    }
}
