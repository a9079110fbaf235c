//! # Invocation Client
//!
//! Builds invocation exchanges for a remote service and interprets the answer.
//! A failure raised by the remote target comes back as `ClientError::Remote`
//! carrying the reconstructed exception.

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use tunpack::Value;
use tunrpc::Attachments;
use tunrpc::ContentType;
use tunrpc::InvocationPath;
use tunrpc::InvocationRequest;
use tunrpc::InvocationResponse;
use tunrpc::RemoteException;
use tunrpc::TransactionDescriptor;
use tunrpc::constants;

use crate::cancel::CancelOutcome;
use crate::context::HttpTargetContext;
use crate::http::header_str;
use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// No response was received.
    Transport(TransportError),
    /// The request could not be encoded or the response could not be decoded.
    Protocol(tunrpc::Error),
    /// The remote side answered with a marshalled exception.
    Remote(RemoteException),
    /// The remote side answered with a status and no exception.
    Status(StatusCode),
    /// The request could not be built.
    Request(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Protocol(e) => write!(f, "Protocol error: {}", e),
            Self::Remote(e) => write!(f, "Remote exception: {}", e),
            Self::Status(code) => write!(f, "Unexpected status: {}", code),
            Self::Request(msg) => write!(f, "Invalid request: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<tunrpc::Error> for ClientError {
    fn from(e: tunrpc::Error) -> Self {
        Self::Protocol(e)
    }
}

impl From<tunpack::Error> for ClientError {
    fn from(e: tunpack::Error) -> Self {
        Self::Protocol(e.into())
    }
}

impl From<http::Error> for ClientError {
    fn from(e: http::Error) -> Self {
        Self::Request(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// One call to make, built fluently.
#[derive(Debug, Clone)]
pub struct InvocationCall {
    pub path: InvocationPath,
    pub parameters: Vec<Value>,
    pub attachments: Attachments,
    pub transaction: Option<TransactionDescriptor>,
    pub invocation_id: Option<String>,
    pub session_affinity: Option<String>,
}

impl InvocationCall {
    pub fn new(path: InvocationPath) -> Self {
        Self {
            path,
            parameters: Vec::new(),
            attachments: Attachments::new(),
            transaction: None,
            invocation_id: None,
            session_affinity: None,
        }
    }

    pub fn parameter(mut self, value: Value) -> Self {
        self.parameters.push(value);
        self
    }

    pub fn attachment(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attachments.insert(key, value);
        self
    }

    pub fn transaction(mut self, descriptor: TransactionDescriptor) -> Self {
        self.transaction = Some(descriptor);
        self
    }

    /// Makes the call cancellable under `id`. Requires a session affinity too.
    pub fn invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Makes the call cancellable under a fresh random id.
    pub fn random_invocation_id(self) -> Self {
        let id = format!("{:016x}", rand::random::<u64>());
        self.invocation_id(id)
    }

    pub fn session_affinity(mut self, affinity: impl Into<String>) -> Self {
        self.session_affinity = Some(affinity.into());
        self
    }
}

pub struct InvocationClient {
    context: Arc<HttpTargetContext>,
}

impl InvocationClient {
    pub fn new(context: Arc<HttpTargetContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<HttpTargetContext> {
        &self.context
    }

    #[tracing::instrument(skip(self, call), fields(method = %call.path.method))]
    pub async fn invoke(&self, call: InvocationCall) -> Result<InvocationResponse> {
        call.path.check_arity(call.parameters.len())?;

        let payload = InvocationRequest {
            transaction: call.transaction,
            parameters: call.parameters,
            attachments: call.attachments,
        };
        let mut out = self.context.marshaller();
        payload.encode(out.as_mut())?;
        let body = out.finish()?;

        let uri = self.context.uri(&format!("{}/{}", constants::INVOKE_PATH, call.path.encode()));
        let accept = format!("{},{}", constants::INVOCATION_RESPONSE, constants::EXCEPTION);
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, constants::INVOCATION.to_string())
            .header(header::ACCEPT, accept);
        if let Some(id) = &call.invocation_id {
            builder = builder.header(constants::INVOCATION_ID_HEADER, id.as_str());
        }
        if let Some(affinity) = &call.session_affinity {
            builder = builder.header(header::COOKIE, session_cookie(affinity)?);
        }
        let request = builder.body(Bytes::from(body))?;

        let response = self.context.send(request).await?;
        if response.status() == StatusCode::OK && self.is_response_body(&response) {
            let mut input = self.context.unmarshaller(response.body().to_vec());
            return Ok(InvocationResponse::decode(input.as_mut())?);
        }
        Err(self.failure(&response))
    }

    /// Asks the server to cancel the invocation registered as `invocation_id`.
    #[tracing::instrument(skip(self, path, session_affinity))]
    pub async fn cancel(
        &self,
        path: &InvocationPath,
        invocation_id: &str,
        session_affinity: &str,
        cancel_if_running: bool,
    ) -> Result<CancelOutcome> {
        let mut target = format!(
            "{}/{}/{}/{}/{}/{}",
            constants::CANCEL_PATH,
            dash(&path.app),
            dash(&path.module),
            dash(&path.distinct),
            path.component,
            invocation_id,
        );
        if cancel_if_running {
            target.push_str("/true");
        }
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(self.context.uri(&target))
            .header(header::COOKIE, session_cookie(session_affinity)?)
            .body(Bytes::new())?;

        let response = self.context.send(request).await?;
        match response.status() {
            StatusCode::OK => Ok(CancelOutcome::Acknowledged),
            StatusCode::ACCEPTED => Ok(CancelOutcome::Unknown),
            StatusCode::NOT_FOUND => Ok(CancelOutcome::NotFound),
            _ => Err(self.failure(&response)),
        }
    }

    fn is_response_body(&self, response: &Response<Bytes>) -> bool {
        header_str(response.headers(), header::CONTENT_TYPE.as_str())
            .and_then(|v| ContentType::parse(v).ok())
            .is_some_and(|ct| constants::INVOCATION_RESPONSE.matches(&ct))
    }

    fn failure(&self, response: &Response<Bytes>) -> ClientError {
        match self.context.read_exception(response) {
            Some(remote) => ClientError::Remote(remote),
            None => ClientError::Status(response.status()),
        }
    }
}

fn dash(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

fn session_cookie(affinity: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("{}={}", constants::SESSION_COOKIE, affinity))
        .map_err(|e| ClientError::Request(e.to_string()))
}
