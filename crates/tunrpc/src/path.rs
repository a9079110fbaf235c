//! # Invocation Path
//!
//! The address of an invocation, carried as the request path relative to the
//! invoke mount point:
//!
//! ```text
//! app/module/distinct/component/session-or-dash/view/method/param-type*
//! ```
//!
//! ## Invariants
//! - **Minimum Shape**: Fewer than seven segments is `Error::PathTooShort`, which the
//!   dispatcher answers as "not found" rather than as a fault.
//! - **Dash Is Empty**: A `-` (or empty) app, module, distinct or session segment
//!   decodes to the empty value and re-encodes as `-`.
//! - **Round Trip**: `decode(encode(p)) == p`, and `encode(decode(s)) == s` for
//!   every `s` produced by `encode`.

use base64::Engine;
use base64::alphabet;
use base64::engine::DecodePaddingMode;
use base64::engine::GeneralPurpose;
use base64::engine::GeneralPurposeConfig;

use crate::Error;
use crate::Result;

/// Placeholder for an empty segment.
pub const DASH: &str = "-";

/// Minimum number of segments in a valid invocation path.
pub const MIN_SEGMENTS: usize = 7;

/// URL-safe alphabet. Writes padding, accepts input with or without it.
const SESSION_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationPath {
    pub app: String,
    pub module: String,
    pub distinct: String,
    pub component: String,
    /// Raw session id bytes; `None` for stateless and home invocations.
    pub session_id: Option<Vec<u8>>,
    pub view: String,
    pub method: String,
    pub parameter_types: Vec<String>,
}

impl InvocationPath {
    pub fn new(
        app: impl Into<String>,
        module: impl Into<String>,
        distinct: impl Into<String>,
        component: impl Into<String>,
        view: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            module: module.into(),
            distinct: distinct.into(),
            component: component.into(),
            session_id: None,
            view: view.into(),
            method: method.into(),
            parameter_types: Vec::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<Vec<u8>>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_parameter(mut self, type_name: impl Into<String>) -> Self {
        self.parameter_types.push(type_name.into());
        self
    }

    pub fn parse(path: &str) -> Result<Self> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut parts: Vec<&str> = path.split('/').collect();
        // trailing empty segments carry no information
        while parts.last().is_some_and(|p| p.is_empty()) {
            parts.pop();
        }
        if parts.len() < MIN_SEGMENTS {
            return Err(Error::PathTooShort(parts.len()));
        }

        let session = undash(parts[4]);
        let session_id = if session.is_empty() {
            None
        } else {
            let bytes = SESSION_ENGINE
                .decode(session)
                .map_err(|e| Error::MalformedPath(format!("session id: {}", e)))?;
            Some(bytes)
        };

        Ok(Self {
            app: undash(parts[0]).to_string(),
            module: undash(parts[1]).to_string(),
            distinct: undash(parts[2]).to_string(),
            component: parts[3].to_string(),
            session_id,
            view: parts[5].to_string(),
            method: parts[6].to_string(),
            parameter_types: parts[MIN_SEGMENTS..].iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn encode(&self) -> String {
        let session = self
            .session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| SESSION_ENGINE.encode(s))
            .unwrap_or_else(|| DASH.to_string());

        let mut segments: Vec<&str> = vec![
            dash(&self.app),
            dash(&self.module),
            dash(&self.distinct),
            self.component.as_str(),
            session.as_str(),
            self.view.as_str(),
            self.method.as_str(),
        ];
        segments.extend(self.parameter_types.iter().map(String::as_str));
        segments.join("/")
    }

    pub fn is_stateful(&self) -> bool {
        self.session_id.is_some()
    }

    /// Checks the declared parameter types against the number actually supplied.
    pub fn check_arity(&self, count: usize) -> Result<()> {
        if self.parameter_types.len() == count {
            Ok(())
        } else {
            Err(Error::ProtocolViolation(format!(
                "method {} declares {} parameters, {} supplied",
                self.method,
                self.parameter_types.len(),
                count,
            )))
        }
    }
}

impl std::fmt::Display for InvocationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

fn undash(segment: &str) -> &str {
    if segment == DASH { "" } else { segment }
}

fn dash(value: &str) -> &str {
    if value.is_empty() { DASH } else { value }
}
