//! # Association
//!
//! The seam between the dispatcher and whatever hosts the invocable components.
//!
//! ## Philosophy
//!
//! - **Closed Views**: A target is addressed through a `Locator` that is exactly one
//!   of stateless, stateful (with its session) or home. There is no open hierarchy.
//! - **Locate, Then Invoke**: Lookup failures (`TargetError`) are reported before any
//!   invocation state exists; once an `Invocable` is returned the call will run.
//! - **Outcomes, Not Panics**: Targets report everything through `InvocationOutcome`.

use std::sync::Arc;

use tunpack::Value;
use tunrpc::Attachments;
use tunrpc::RemoteException;
use tunrpc::TransactionDescriptor;

use crate::cancel::CancelHandle;
use crate::cancel::InvocationIdentifier;
use crate::transaction::Transaction;

/// Names one deployed component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentIdentifier {
    pub app: String,
    pub module: String,
    pub distinct: String,
    pub component: String,
}

impl ComponentIdentifier {
    pub fn new(
        app: impl Into<String>,
        module: impl Into<String>,
        distinct: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self { app: app.into(), module: module.into(), distinct: distinct.into(), component: component.into() }
    }
}

impl std::fmt::Display for ComponentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}/{}", self.app, self.module, self.distinct, self.component)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorKind {
    Stateless,
    Stateful { session_id: Vec<u8> },
    Home,
}

/// A component view plus how to reach an instance behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub component: ComponentIdentifier,
    pub view: String,
    pub kind: LocatorKind,
}

impl Locator {
    pub fn session_id(&self) -> Option<&[u8]> {
        match &self.kind {
            LocatorKind::Stateful { session_id } => Some(session_id),
            _ => None,
        }
    }
}

/// A method by name and declared parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodLocator {
    pub name: String,
    pub parameter_types: Vec<String>,
}

impl MethodLocator {
    pub fn new(name: impl Into<String>, parameter_types: Vec<String>) -> Self {
        Self { name: name.into(), parameter_types }
    }
}

impl std::fmt::Display for MethodLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(","))
    }
}

/// Why a target could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    NoSuchComponent(ComponentIdentifier),
    NoSuchMethod(MethodLocator),
    /// The component exists but does not expose the requested view.
    WrongView(String),
    /// A session was supplied for a component that keeps none.
    NotStateful(ComponentIdentifier),
    /// The session has expired or never existed.
    SessionNotActive(ComponentIdentifier),
}

impl std::fmt::Display for TargetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSuchComponent(c) => write!(f, "No such component: {}", c),
            Self::NoSuchMethod(m) => write!(f, "No such method: {}", m),
            Self::WrongView(v) => write!(f, "Wrong view type: {}", v),
            Self::NotStateful(c) => write!(f, "Component is not stateful: {}", c),
            Self::SessionNotActive(c) => write!(f, "Session not active: {}", c),
        }
    }
}

impl std::error::Error for TargetError {}

/// Everything a target needs to run one call. Immutable once built.
#[derive(Clone)]
pub struct ResolvedInvocation {
    pub locator: Locator,
    pub method: MethodLocator,
    pub parameters: Vec<Value>,
    pub attachments: Attachments,
    pub session_affinity: Option<String>,
    pub transaction: Option<TransactionDescriptor>,
    /// The imported transaction, when a descriptor was sent and a manager is configured.
    pub imported: Option<Arc<dyn Transaction>>,
    pub identifier: Option<InvocationIdentifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success(Value),
    /// The target failed in its own terms; returned to the caller verbatim.
    Exception(RemoteException),
    /// The target disappeared or refused the call after it was located.
    Target(TargetError),
    /// The target observed a cancellation request and stopped.
    Cancelled,
}

/// Looks up targets by locator and method.
pub trait Association: Send + Sync + 'static {
    /// Whether `view` of `component` is its home interface.
    fn is_home_view(&self, _component: &ComponentIdentifier, _view: &str) -> bool {
        false
    }

    fn locate(&self, locator: &Locator, method: &MethodLocator) -> Result<Arc<dyn Invocable>, TargetError>;
}

/// A located method, ready to run.
#[async_trait::async_trait]
pub trait Invocable: Send + Sync + 'static {
    async fn invoke(&self, invocation: ResolvedInvocation, cancel: CancelHandle) -> InvocationOutcome;
}
