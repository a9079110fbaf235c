//! # Remote Exceptions
//!
//! Failures travel as codec objects so the caller can rebuild the original
//! failure type. The object's class is the exception class; its fields are
//! `message`, an optional `errorCode` and an optional `cause`.

use tunpack::Marshaller;
use tunpack::Unmarshaller;
use tunpack::Value;

use crate::Error;
use crate::Result;

/// Exception class names produced by this protocol.
pub mod classes {
    /// A payload named a type the class filter refused.
    pub const INVALID_CLASS: &str = "java.io.InvalidClassException";
    /// A payload could not be decoded.
    pub const STREAM_CORRUPTED: &str = "java.io.StreamCorruptedException";
    pub const ILLEGAL_STATE: &str = "java.lang.IllegalStateException";
    pub const CANCELLATION: &str = "java.util.concurrent.CancellationException";
    pub const NO_SUCH_EJB: &str = "jakarta.ejb.NoSuchEJBException";
    pub const NO_SUCH_METHOD: &str = "java.lang.NoSuchMethodException";
    pub const WRONG_VIEW: &str = "java.lang.IllegalArgumentException";
    pub const NOT_STATEFUL: &str = "java.lang.IllegalArgumentException";
    pub const SESSION_NOT_ACTIVE: &str = "jakarta.ejb.NoSuchEJBException";
    /// Carries an XA `errorCode`.
    pub const XA_EXCEPTION: &str = "javax.transaction.xa.XAException";
    /// Catch-all for failures with no better class.
    pub const RUNTIME: &str = "java.lang.RuntimeException";
}

const MESSAGE: &str = "message";
const ERROR_CODE: &str = "errorCode";
const CAUSE: &str = "cause";

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteException {
    pub class: String,
    pub message: Option<String>,
    pub error_code: Option<i32>,
    pub cause: Option<Box<RemoteException>>,
}

impl RemoteException {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self { class: class.into(), message: Some(message.into()), error_code: None, cause: None }
    }

    /// Builds an exception from any local error, keeping its source chain as causes.
    pub fn from_error(class: impl Into<String>, err: &(dyn std::error::Error + 'static)) -> Self {
        let cause = err
            .source()
            .map(|source| Box::new(Self::from_error(classes::RUNTIME, source)));
        Self { class: class.into(), message: Some(err.to_string()), error_code: None, cause }
    }

    pub fn with_error_code(mut self, code: i32) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_cause(mut self, cause: RemoteException) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn to_value(&self) -> Value {
        let mut fields = vec![(
            MESSAGE.to_string(),
            self.message.clone().map(Value::String).unwrap_or(Value::Null),
        )];
        if let Some(code) = self.error_code {
            fields.push((ERROR_CODE.to_string(), Value::Int(code)));
        }
        if let Some(cause) = &self.cause {
            fields.push((CAUSE.to_string(), cause.to_value()));
        }
        Value::object(self.class.clone(), fields)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let class = value
            .class()
            .ok_or_else(|| Error::ProtocolViolation("exception payload is not an object".into()))?;
        let message = value.field(MESSAGE).and_then(Value::as_str).map(str::to_string);
        let error_code = value.field(ERROR_CODE).and_then(Value::as_int);
        let cause = match value.field(CAUSE) {
            None | Some(Value::Null) => None,
            Some(c) => Some(Box::new(Self::from_value(c)?)),
        };
        Ok(Self { class: class.to_string(), message, error_code, cause })
    }

    pub fn write_to(&self, out: &mut dyn Marshaller) -> Result<()> {
        out.write_object(&self.to_value())?;
        Ok(())
    }

    /// Reads the exception object and requires the body to end there.
    pub fn read_from(input: &mut dyn Unmarshaller) -> Result<Self> {
        let value = input.read_object()?;
        input.finish()?;
        Self::from_value(&value)
    }
}

impl std::fmt::Display for RemoteException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class, message),
            None => f.write_str(&self.class),
        }
    }
}

impl std::error::Error for RemoteException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
