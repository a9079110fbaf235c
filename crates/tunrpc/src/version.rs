//! # Protocol Version
//!
//! Per-connection version negotiation and the namespace translation that lets
//! legacy (`javax.`) and current (`jakarta.`) peers exchange objects.
//!
//! ## Invariants
//! - **Pinned Once**: A `ConnectionVersion` settles on the first response it
//!   observes and never changes afterwards, even under concurrent first requests.
//! - **Absent Means Legacy**: A peer that does not answer the probe speaks version 1.
//! - **Never Above Local**: The pinned version is `min(local latest, advertised)`.

use std::sync::Arc;
use std::sync::OnceLock;

use tunpack::ClassResolver;

/// Header carrying a peer's latest supported version.
pub const PROTOCOL_VERSION_HEADER: &str = "x-wf-version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// Legacy peers, `javax.` namespace.
    V1 = 1,
    /// Current peers, `jakarta.` namespace.
    V2 = 2,
}

/// The latest version this implementation speaks.
pub const LATEST_VERSION: ProtocolVersion = ProtocolVersion::V2;

impl ProtocolVersion {
    /// Interprets an advertised version. Values above our latest clamp to it;
    /// anything unparsable or below 2 is treated as legacy.
    pub fn from_header(value: &str) -> Self {
        match value.trim().parse::<u32>() {
            Ok(n) if n >= 2 => Self::V2,
            _ => Self::V1,
        }
    }

    pub fn as_header_value(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V2 => "2",
        }
    }

    /// True when objects must be renamed between namespaces for this peer.
    pub fn is_legacy(&self) -> bool {
        *self < LATEST_VERSION
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_header_value())
    }
}

/// Client-side negotiated version for one connection (or target context).
#[derive(Debug)]
pub struct ConnectionVersion {
    local: ProtocolVersion,
    pinned: OnceLock<ProtocolVersion>,
}

impl Default for ConnectionVersion {
    fn default() -> Self {
        Self::new(LATEST_VERSION)
    }
}

impl ConnectionVersion {
    pub fn new(local: ProtocolVersion) -> Self {
        Self { local, pinned: OnceLock::new() }
    }

    pub fn pinned(&self) -> Option<ProtocolVersion> {
        self.pinned.get().copied()
    }

    /// True until the first response has been observed.
    pub fn is_probing(&self) -> bool {
        self.pinned.get().is_none()
    }

    /// The version header for the next request: our latest while probing,
    /// the pinned version afterwards.
    pub fn request_header(&self) -> (&'static str, &'static str) {
        let version = self.pinned().unwrap_or(self.local);
        (PROTOCOL_VERSION_HEADER, version.as_header_value())
    }

    /// Records the peer's answer to a probe and returns the version in force.
    /// Only the first observation counts.
    pub fn observe(&self, advertised: Option<&str>) -> ProtocolVersion {
        *self.pinned.get_or_init(|| {
            let remote = advertised.map(ProtocolVersion::from_header).unwrap_or(ProtocolVersion::V1);
            self.local.min(remote)
        })
    }

    /// The version in force, assuming our own latest until pinned.
    pub fn current(&self) -> ProtocolVersion {
        self.pinned().unwrap_or(self.local)
    }
}

const LEGACY_ROOT: &str = "javax.";
const CURRENT_ROOT: &str = "jakarta.";

/// `javax.` subpackages that moved to `jakarta.`. Platform packages such as
/// `javax.transaction.xa` did not move and are never translated.
const MIGRATED: &[&str] = &[
    "annotation.",
    "ejb.",
    "enterprise.",
    "interceptor.",
    "jms.",
    "persistence.",
    "resource.",
    "transaction.",
];
const NOT_MIGRATED: &[&str] = &["transaction.xa."];

fn migrated(rest: &str) -> bool {
    MIGRATED.iter().any(|p| rest.starts_with(p)) && !NOT_MIGRATED.iter().any(|p| rest.starts_with(p))
}

/// Maps a legacy name to the current namespace; other names pass through.
pub fn to_current(name: &str) -> String {
    match name.strip_prefix(LEGACY_ROOT) {
        Some(rest) if migrated(rest) => format!("{}{}", CURRENT_ROOT, rest),
        _ => name.to_string(),
    }
}

/// Maps a current name to the legacy namespace; other names pass through.
pub fn to_legacy(name: &str) -> String {
    match name.strip_prefix(CURRENT_ROOT) {
        Some(rest) if migrated(rest) => format!("{}{}", LEGACY_ROOT, rest),
        _ => name.to_string(),
    }
}

/// Presents a legacy peer's names in the current namespace, and the reverse on
/// write, then defers to the wrapped resolver.
pub struct NamespaceTranslatingResolver {
    inner: Arc<dyn ClassResolver>,
}

impl NamespaceTranslatingResolver {
    pub fn new(inner: Arc<dyn ClassResolver>) -> Self {
        Self { inner }
    }
}

impl ClassResolver for NamespaceTranslatingResolver {
    fn resolve_class(&self, name: &str) -> tunpack::Result<String> {
        self.inner.resolve_class(&to_current(name))
    }

    fn resolve_proxy(&self, interfaces: &[String]) -> tunpack::Result<Vec<String>> {
        let local: Vec<String> = interfaces.iter().map(|i| to_current(i)).collect();
        self.inner.resolve_proxy(&local)
    }

    fn annotate_class(&self, name: &str) -> String {
        to_legacy(&self.inner.annotate_class(name))
    }
}
