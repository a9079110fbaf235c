//! # Service Configuration
//!
//! Fluent builder for the settings shared by every handler of one service.

use std::sync::Arc;
use std::time::Duration;

use tunpack::ClassResolver;
use tunpack::DefaultClassResolver;
use tunpack::FilteringClassResolver;
use tunpack::Marshaller;
use tunpack::MarshallerFactory;
use tunpack::PackFactory;
use tunpack::Unmarshaller;
use tunpack::resolver::ClassFilter;
use tunrpc::ProtocolV1ObjectTable;
use tunrpc::ProtocolVersion;
use tunrpc::version::NamespaceTranslatingResolver;

pub const DEFAULT_MAX_WORKERS: usize = 16;
pub const DEFAULT_CANCEL_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ServiceConfig {
    factory: Arc<dyn MarshallerFactory>,
    class_filter: Option<ClassFilter>,
    max_workers: usize,
    cancel_wait: Duration,
    ee_namespace_interop: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::new()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn cancel_wait(&self) -> Duration {
        self.cancel_wait
    }

    pub fn ee_namespace_interop(&self) -> bool {
        self.ee_namespace_interop
    }

    /// The resolver chain for one exchange with a peer speaking `peer`.
    ///
    /// The class filter always sees local (current namespace) names.
    pub fn resolver(&self, peer: ProtocolVersion) -> Arc<dyn ClassResolver> {
        let filtering: Arc<dyn ClassResolver> =
            Arc::new(FilteringClassResolver::new(Arc::new(DefaultClassResolver), self.class_filter.clone()));
        if self.ee_namespace_interop && peer.is_legacy() {
            Arc::new(NamespaceTranslatingResolver::new(filtering))
        } else {
            filtering
        }
    }

    pub fn marshaller(&self, peer: ProtocolVersion) -> Box<dyn Marshaller> {
        self.factory.create_marshaller(self.resolver(peer), Arc::new(ProtocolV1ObjectTable))
    }

    pub fn unmarshaller(&self, peer: ProtocolVersion, input: Vec<u8>) -> Box<dyn Unmarshaller> {
        self.factory.create_unmarshaller(self.resolver(peer), Arc::new(ProtocolV1ObjectTable), input)
    }
}

pub struct ServiceConfigBuilder {
    factory: Arc<dyn MarshallerFactory>,
    class_filter: Option<ClassFilter>,
    max_workers: usize,
    cancel_wait: Duration,
    ee_namespace_interop: bool,
}

impl Default for ServiceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConfigBuilder {
    pub fn new() -> Self {
        Self {
            factory: Arc::new(PackFactory),
            class_filter: None,
            max_workers: DEFAULT_MAX_WORKERS,
            cancel_wait: DEFAULT_CANCEL_WAIT,
            ee_namespace_interop: false,
        }
    }

    pub fn marshaller_factory(mut self, factory: Arc<dyn MarshallerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Only types for which `filter` returns true may be unmarshalled.
    pub fn class_filter(mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.class_filter = Some(Arc::new(filter));
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.max(1);
        self
    }

    pub fn cancel_wait(mut self, wait: Duration) -> Self {
        self.cancel_wait = wait;
        self
    }

    pub fn ee_namespace_interop(mut self, enabled: bool) -> Self {
        self.ee_namespace_interop = enabled;
        self
    }

    pub fn build(self) -> ServiceConfig {
        ServiceConfig {
            factory: self.factory,
            class_filter: self.class_filter,
            max_workers: self.max_workers,
            cancel_wait: self.cancel_wait,
            ee_namespace_interop: self.ee_namespace_interop,
        }
    }
}
