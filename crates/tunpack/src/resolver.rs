//! # Class Resolution
//!
//! The gate between a type name on the wire and a value handed to the caller.
//!
//! ## Invariants
//! - **Resolve Before Build**: The unmarshaller consults `resolve_class` for an
//!   `Object` (or `resolve_proxy` for a `Proxy`) before reading any of its fields.
//! - **Once Per Name**: Each candidate name is presented exactly once per occurrence.

use std::sync::Arc;

use crate::Error;
use crate::Result;

/// Maps wire type names to local names, refusing names it will not materialise.
pub trait ClassResolver: Send + Sync + 'static {
    /// Resolves a class name read from the wire into the local name.
    fn resolve_class(&self, name: &str) -> Result<String>;

    /// Resolves every interface of a proxy. Fails on the first refused name.
    fn resolve_proxy(&self, interfaces: &[String]) -> Result<Vec<String>> {
        interfaces.iter().map(|name| self.resolve_class(name)).collect()
    }

    /// Maps a local class name to the name written on the wire.
    fn annotate_class(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Accepts every name unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassResolver;

impl ClassResolver for DefaultClassResolver {
    fn resolve_class(&self, name: &str) -> Result<String> {
        Ok(name.to_string())
    }
}

/// A predicate deciding whether a type name may be materialised.
pub type ClassFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Wraps a resolver with a name predicate that runs first.
///
/// A name the filter refuses fails with `Error::RejectedClass` and never
/// reaches the inner resolver.
#[derive(Clone)]
pub struct FilteringClassResolver {
    inner: Arc<dyn ClassResolver>,
    filter: Option<ClassFilter>,
}

impl FilteringClassResolver {
    pub fn new(inner: Arc<dyn ClassResolver>, filter: Option<ClassFilter>) -> Self {
        Self { inner, filter }
    }

    fn check_filter(&self, name: &str) -> Result<()> {
        match &self.filter {
            Some(filter) if !filter(name) => Err(Error::RejectedClass(name.to_string())),
            _ => Ok(()),
        }
    }
}

impl ClassResolver for FilteringClassResolver {
    fn resolve_class(&self, name: &str) -> Result<String> {
        self.check_filter(name)?;
        self.inner.resolve_class(name)
    }

    fn resolve_proxy(&self, interfaces: &[String]) -> Result<Vec<String>> {
        for name in interfaces {
            self.check_filter(name)?;
        }
        self.inner.resolve_proxy(interfaces)
    }

    fn annotate_class(&self, name: &str) -> String {
        self.inner.annotate_class(name)
    }
}
