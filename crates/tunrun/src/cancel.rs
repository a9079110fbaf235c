//! # Cancellation
//!
//! Cancel handles for in-flight invocations and the registry that lets a later
//! request find them.
//!
//! ## Invariants
//! - **Registered Before Run**: A handle is registered after its target is located
//!   and before the target body runs. A target that is never located never registers.
//! - **Removed Once**: Each registration is removed exactly once, on the first
//!   terminal outcome, by its `Registration` guard.
//! - **Last Write Wins**: Registering a duplicate identifier replaces the earlier
//!   handle. The earlier invocation's guard then leaves the newer entry alone.
//! - **Early Cancel Is Lost**: A cancellation that arrives before its identifier is
//!   registered finds nothing and is answered "not found".

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use http::HeaderMap;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use tokio::sync::watch;
use tunrpc::constants::INVOCATION_ID_HEADER;
use tunrpc::constants::SESSION_COOKIE;

use crate::http::HttpHandler;
use crate::http::cookie;
use crate::http::header_str;
use crate::http::status;

/// Key of a cancellable invocation: the client's request id plus its session affinity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationIdentifier {
    pub request_id: String,
    pub session_affinity: String,
}

impl InvocationIdentifier {
    pub fn new(request_id: impl Into<String>, session_affinity: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), session_affinity: session_affinity.into() }
    }

    /// Present only when the request carries both the invocation id header and the session cookie.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let request_id = header_str(headers, INVOCATION_ID_HEADER)?;
        let session_affinity = cookie(headers, SESSION_COOKIE)?;
        Some(Self::new(request_id, session_affinity))
    }
}

impl std::fmt::Display for InvocationIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.request_id, self.session_affinity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Requested {
    Nothing,
    Polite,
    Aggressive,
}

struct CancelState {
    requested: watch::Sender<Requested>,
    acknowledged: watch::Sender<Option<bool>>,
}

/// Shared between the running invocation and whoever wants to cancel it.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(Requested::Nothing);
        let (acknowledged, _) = watch::channel(None);
        Self { state: Arc::new(CancelState { requested, acknowledged }) }
    }

    /// Requests cancellation. An aggressive request upgrades an earlier polite one.
    pub fn cancel(&self, aggressive: bool) {
        let level = if aggressive { Requested::Aggressive } else { Requested::Polite };
        self.state.requested.send_if_modified(|current| {
            if level > *current {
                *current = level;
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.requested.borrow() != Requested::Nothing
    }

    /// The canceller asked for the invocation to be stopped even though it is running.
    pub fn is_aggressive(&self) -> bool {
        *self.state.requested.borrow() == Requested::Aggressive
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.state.requested.subscribe();
        let _ = rx.wait_for(|r| *r != Requested::Nothing).await;
    }

    /// Reports whether the invocation was actually cancelled. Only the first report counts.
    pub fn acknowledge(&self, cancelled: bool) {
        self.state.acknowledged.send_if_modified(|ack| {
            if ack.is_none() {
                *ack = Some(cancelled);
                true
            } else {
                false
            }
        });
    }

    /// Waits up to `timeout` for the acknowledgement. `None` means the outcome is unknown.
    pub async fn wait_acknowledged(&self, timeout: Duration) -> Option<bool> {
        let mut rx = self.state.acknowledged.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(ack)) => *ack,
            _ => None,
        }
    }

    fn same(&self, other: &CancelHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("requested", &*self.state.requested.borrow())
            .field("acknowledged", &*self.state.acknowledged.borrow())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No invocation is registered under the identifier.
    NotFound,
    /// The invocation reported back before the wait bound.
    Acknowledged,
    /// The invocation did not report back within the wait bound.
    Unknown,
}

#[derive(Default)]
pub struct CancellationRegistry {
    handles: DashMap<InvocationIdentifier, CancelHandle>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle`, returning the handle it replaced, if any.
    pub fn register(&self, id: InvocationIdentifier, handle: CancelHandle) -> Option<CancelHandle> {
        tracing::trace!(%id, "registering cancel handle");
        let previous = self.handles.insert(id, handle);
        if previous.is_some() {
            tracing::debug!("duplicate invocation identifier, earlier handle replaced");
        }
        previous
    }

    /// Idempotent; returns whether anything was removed.
    pub fn remove(&self, id: &InvocationIdentifier) -> bool {
        let removed = self.handles.remove(id).is_some();
        tracing::trace!(%id, removed, "removing cancel handle");
        removed
    }

    fn remove_handle(&self, id: &InvocationIdentifier, handle: &CancelHandle) -> bool {
        let removed = self.handles.remove_if(id, |_, current| current.same(handle)).is_some();
        tracing::trace!(%id, removed, "releasing cancel handle");
        removed
    }

    pub fn get(&self, id: &InvocationIdentifier) -> Option<CancelHandle> {
        self.handles.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &InvocationIdentifier) -> bool {
        self.handles.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Requests cancellation of `id` and waits up to `wait` for the invocation to answer.
    pub async fn cancel(&self, id: &InvocationIdentifier, aggressive: bool, wait: Duration) -> CancelOutcome {
        let Some(handle) = self.get(id) else {
            return CancelOutcome::NotFound;
        };
        handle.cancel(aggressive);
        match handle.wait_acknowledged(wait).await {
            Some(cancelled) => {
                tracing::debug!(%id, cancelled, "cancellation acknowledged");
                CancelOutcome::Acknowledged
            }
            None => CancelOutcome::Unknown,
        }
    }
}

/// A live registration, released on the first terminal outcome or on drop.
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    entry: Option<(InvocationIdentifier, CancelHandle)>,
}

impl Registration {
    pub fn new(registry: Arc<CancellationRegistry>, id: InvocationIdentifier, handle: CancelHandle) -> Self {
        registry.register(id.clone(), handle.clone());
        Self { registry, entry: Some((id, handle)) }
    }

    /// Removes the registration. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some((id, handle)) = self.entry.take() {
            self.registry.remove_handle(&id, &handle);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

/// Serves `DELETE app/module/distinct/component/invocation-id[/cancel-if-running]`.
pub struct CancelHandler {
    registry: Arc<CancellationRegistry>,
    wait: Duration,
}

impl CancelHandler {
    pub fn new(registry: Arc<CancellationRegistry>, wait: Duration) -> Self {
        Self { registry, wait }
    }
}

#[async_trait::async_trait]
impl HttpHandler for CancelHandler {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if request.method() != Method::DELETE {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }

        let parts: Vec<&str> = request
            .uri()
            .path()
            .trim_start_matches('/')
            .split('/')
            .collect();
        if parts.len() < 5 || parts[4].is_empty() {
            tracing::debug!(path = %request.uri().path(), "cancel path too short");
            return status(StatusCode::NOT_FOUND);
        }
        let aggressive = parts.get(5).is_some_and(|p| p.eq_ignore_ascii_case("true"));

        let Some(session) = cookie(request.headers(), SESSION_COOKIE) else {
            tracing::debug!("cancel request without session cookie");
            return status(StatusCode::BAD_REQUEST);
        };
        let id = InvocationIdentifier::new(parts[4], session);

        match self.registry.cancel(&id, aggressive, self.wait).await {
            CancelOutcome::NotFound => status(StatusCode::NOT_FOUND),
            CancelOutcome::Acknowledged => status(StatusCode::OK),
            CancelOutcome::Unknown => status(StatusCode::ACCEPTED),
        }
    }
}
