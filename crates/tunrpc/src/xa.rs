//! # XA Outcomes
//!
//! The two-phase-commit outcome codes and the error type every transaction
//! primitive fails with.

use std::sync::Arc;

use crate::RemoteException;
use crate::exception::classes;

pub const XA_OK: i32 = 0;
pub const XA_RDONLY: i32 = 3;

pub const XA_HEURMIX: i32 = 5;
pub const XA_HEURRB: i32 = 6;
pub const XA_HEURCOM: i32 = 7;
pub const XA_HEURHAZ: i32 = 8;
pub const XA_RBROLLBACK: i32 = 100;

/// Resource manager error; the generic fatal code.
pub const XAER_RMERR: i32 = -3;
pub const XAER_NOTA: i32 = -4;
pub const XAER_INVAL: i32 = -5;
pub const XAER_PROTO: i32 = -6;
pub const XAER_RMFAIL: i32 = -7;

/// The vote of a successful prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    Ok,
    /// The branch did no work and takes no part in the second phase.
    ReadOnly,
}

impl PrepareOutcome {
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => XA_OK,
            Self::ReadOnly => XA_RDONLY,
        }
    }
}

type Source = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone)]
pub struct XaError {
    code: i32,
    message: String,
    interrupted: bool,
    source: Option<Source>,
}

impl XaError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), interrupted: false, source: None }
    }

    /// A resource manager failure caused by `source`.
    pub fn rm_error(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        let message = source.to_string();
        Self::new(XAER_RMERR, message).with_source(source)
    }

    /// The wait for an outcome was interrupted; the outcome is unknown.
    pub fn interrupted() -> Self {
        Self { interrupted: true, ..Self::new(XAER_RMERR, "interrupted while awaiting outcome") }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn to_remote(&self) -> RemoteException {
        RemoteException::new(classes::XA_EXCEPTION, self.message.clone()).with_error_code(self.code)
    }

    /// Recovers the XA error carried by a remote exception, if it is one.
    pub fn from_remote(remote: &RemoteException) -> Option<Self> {
        if remote.class != classes::XA_EXCEPTION {
            return None;
        }
        let code = remote.error_code?;
        let message = remote.message.clone().unwrap_or_default();
        Some(Self::new(code, message))
    }
}

impl PartialEq for XaError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.interrupted == other.interrupted
    }
}

impl std::fmt::Display for XaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XA error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for XaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static))
    }
}
