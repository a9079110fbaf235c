//! # Invocation Dispatcher
//!
//! Serves `POST <invoke-root>/app/module/distinct/component/session/view/method/types*`.
//!
//! ## Lifecycle
//!
//! `RECEIVED -> CONTENT-VALIDATED -> PATH-DECODED -> DISPATCHED -> terminal`
//!
//! The accepting task validates the content type and decodes the path. Everything
//! after that runs on the worker pool: the body is decoded in full, the caller's
//! transaction is imported, the target is located, the cancel handle is registered,
//! the target runs, and exactly one response is written.
//!
//! ## Invariants
//! - **Decode Before Effects**: A body that fails to decode (including a type refused
//!   by the class filter) never imports a transaction, reaches a target or registers.
//! - **One Response**: Every request gets exactly one response, panics included.
//! - **One Removal**: A registered identifier is removed exactly once, on the first
//!   terminal outcome.

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use tunpack::Value;
use tunrpc::Attachments;
use tunrpc::InvocationPath;
use tunrpc::InvocationRequest;
use tunrpc::InvocationResponse;
use tunrpc::ProtocolVersion;
use tunrpc::RemoteException;
use tunrpc::constants;
use tunrpc::constants::SESSION_COOKIE;
use tunrpc::exception::classes;
use tunrpc::version::PROTOCOL_VERSION_HEADER;

use crate::association::Association;
use crate::association::ComponentIdentifier;
use crate::association::InvocationOutcome;
use crate::association::Locator;
use crate::association::LocatorKind;
use crate::association::MethodLocator;
use crate::association::ResolvedInvocation;
use crate::association::TargetError;
use crate::cancel::CancelHandle;
use crate::cancel::CancellationRegistry;
use crate::cancel::InvocationIdentifier;
use crate::cancel::Registration;
use crate::config::ServiceConfig;
use crate::http::HttpHandler;
use crate::http::cookie;
use crate::http::header_str;
use crate::http::marshalled;
use crate::http::status;
use crate::transaction::Transaction;
use crate::transaction::TransactionManager;
use crate::worker::WorkerPool;

#[derive(Clone)]
struct Dispatcher {
    config: ServiceConfig,
    association: Arc<dyn Association>,
    transactions: Option<Arc<dyn TransactionManager>>,
    registry: Arc<CancellationRegistry>,
}

/// Everything the accepting task hands to the worker.
struct Exchange {
    path: InvocationPath,
    peer: ProtocolVersion,
    identifier: Option<InvocationIdentifier>,
    session_affinity: Option<String>,
    body: Bytes,
}

pub struct InvocationHandler {
    dispatcher: Arc<Dispatcher>,
    workers: WorkerPool,
}

impl InvocationHandler {
    pub fn new(config: ServiceConfig, association: Arc<dyn Association>) -> Self {
        let workers = WorkerPool::new(config.max_workers());
        let dispatcher = Dispatcher {
            config,
            association,
            transactions: None,
            registry: Arc::new(CancellationRegistry::new()),
        };
        Self { dispatcher: Arc::new(dispatcher), workers }
    }

    /// Imports caller transactions through `manager`. Without one, descriptors are ignored.
    pub fn with_transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.dispatcher_mut().transactions = Some(manager);
        self
    }

    /// Shares `registry` with other handlers, typically a `CancelHandler`.
    pub fn with_registry(mut self, registry: Arc<CancellationRegistry>) -> Self {
        self.dispatcher_mut().registry = registry;
        self
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.dispatcher.registry
    }

    fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        Arc::make_mut(&mut self.dispatcher)
    }

    /// Content type and path checks run on the accepting task; they never touch the body.
    fn accept(&self, request: Request<Bytes>) -> Result<Exchange, Response<Bytes>> {
        if request.method() != Method::POST {
            return Err(status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let content_type = header_str(request.headers(), header::CONTENT_TYPE.as_str());
        if let Err(e) = constants::INVOCATION.expect(content_type) {
            tracing::debug!(error = %e, "rejecting invocation");
            return Err(status(StatusCode::BAD_REQUEST));
        }

        let path = match InvocationPath::parse(request.uri().path()) {
            Ok(path) => path,
            Err(tunrpc::Error::PathTooShort(n)) => {
                tracing::debug!(segments = n, path = %request.uri().path(), "invocation path too short");
                return Err(status(StatusCode::NOT_FOUND));
            }
            Err(e) => {
                tracing::debug!(error = %e, "invalid invocation path");
                return Err(status(StatusCode::BAD_REQUEST));
            }
        };

        let headers = request.headers();
        let peer = header_str(headers, PROTOCOL_VERSION_HEADER)
            .map(ProtocolVersion::from_header)
            .unwrap_or(ProtocolVersion::V1);
        let identifier = InvocationIdentifier::from_headers(headers);
        let session_affinity = cookie(headers, SESSION_COOKIE).map(str::to_string);

        Ok(Exchange { path, peer, identifier, session_affinity, body: request.into_body() })
    }
}

#[async_trait::async_trait]
impl HttpHandler for InvocationHandler {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let exchange = match self.accept(request) {
            Ok(exchange) => exchange,
            Err(response) => return response,
        };

        let peer = exchange.peer;
        let dispatcher = self.dispatcher.clone();
        let Some(task) = self.workers.spawn(async move { dispatcher.dispatch(exchange).await }).await else {
            return status(StatusCode::SERVICE_UNAVAILABLE);
        };
        match task.await {
            Ok(response) => response,
            Err(e) => {
                // the registration guard has already been dropped by the unwind
                tracing::warn!(error = %e, "invocation task failed");
                let failure = RemoteException::new(classes::RUNTIME, format!("invocation failed: {}", e));
                self.dispatcher.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure)
            }
        }
    }
}

impl Dispatcher {
    async fn dispatch(&self, exchange: Exchange) -> Response<Bytes> {
        let Exchange { path, peer, identifier, session_affinity, body } = exchange;

        let mut input = self.config.unmarshaller(peer, body.to_vec());
        let request = match InvocationRequest::decode(input.as_mut(), path.parameter_types.len()) {
            Ok(request) => request,
            Err(e) if e.is_security() => {
                tracing::warn!(error = %e, method = %path.method, "refused type in invocation payload");
                let failure = RemoteException::new(classes::INVALID_CLASS, e.to_string());
                return self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure);
            }
            Err(e) => {
                tracing::debug!(error = %e, method = %path.method, "malformed invocation payload");
                let failure = RemoteException::new(classes::STREAM_CORRUPTED, e.to_string());
                return self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure);
            }
        };

        let imported: Option<Arc<dyn Transaction>> = match (&request.transaction, &self.transactions) {
            (Some(descriptor), Some(manager)) => {
                match manager.find_or_import(&descriptor.xid, descriptor.remaining_timeout).await {
                    Ok(transaction) => Some(transaction),
                    Err(e) => {
                        tracing::warn!(error = %e, xid = %descriptor.xid, "transaction import failed");
                        let failure = RemoteException::new(classes::ILLEGAL_STATE, e.to_string())
                            .with_cause(e.to_remote());
                        return self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure);
                    }
                }
            }
            _ => None,
        };

        let component = ComponentIdentifier::new(path.app, path.module, path.distinct, path.component);
        let kind = if self.association.is_home_view(&component, &path.view) {
            LocatorKind::Home
        } else if let Some(session_id) = path.session_id {
            LocatorKind::Stateful { session_id }
        } else {
            LocatorKind::Stateless
        };
        let locator = Locator { component, view: path.view, kind };
        let method = MethodLocator::new(path.method, path.parameter_types);

        let target = match self.association.locate(&locator, &method) {
            Ok(target) => target,
            Err(e) => return self.target_failure(peer, e),
        };

        let handle = CancelHandle::new();
        let mut registration = identifier
            .clone()
            .map(|id| Registration::new(self.registry.clone(), id, handle.clone()));

        let InvocationRequest { transaction, parameters, attachments } = request;
        let invocation = ResolvedInvocation {
            locator,
            method,
            parameters,
            attachments: attachments.clone(),
            session_affinity,
            transaction,
            imported,
            identifier,
        };

        let outcome = target.invoke(invocation, handle.clone()).await;
        handle.acknowledge(matches!(outcome, InvocationOutcome::Cancelled));
        if let Some(registration) = registration.as_mut() {
            registration.release();
        }

        self.respond(peer, outcome, attachments)
    }

    fn respond(&self, peer: ProtocolVersion, outcome: InvocationOutcome, attachments: Attachments) -> Response<Bytes> {
        match outcome {
            InvocationOutcome::Success(result) => self.success(peer, result, attachments),
            InvocationOutcome::Exception(exception) => {
                self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &exception)
            }
            InvocationOutcome::Target(e) => self.target_failure(peer, e),
            InvocationOutcome::Cancelled => {
                let failure = RemoteException::new(classes::CANCELLATION, "invocation cancelled");
                self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure)
            }
        }
    }

    fn success(&self, peer: ProtocolVersion, result: Value, attachments: Attachments) -> Response<Bytes> {
        let response = InvocationResponse { result, attachments };
        let mut out = self.config.marshaller(peer);
        let body = response
            .encode(out.as_mut())
            .and_then(|_| out.finish().map_err(tunrpc::Error::from));
        match body {
            Ok(body) => marshalled(StatusCode::OK, &constants::INVOCATION_RESPONSE, body),
            Err(e) => {
                tracing::warn!(error = %e, "failed to marshal invocation result");
                let failure = RemoteException::new(classes::RUNTIME, format!("cannot marshal result: {}", e));
                self.exception(peer, StatusCode::INTERNAL_SERVER_ERROR, &failure)
            }
        }
    }

    fn target_failure(&self, peer: ProtocolVersion, error: TargetError) -> Response<Bytes> {
        tracing::debug!(error = %error, "invocation target unavailable");
        let (code, class) = match &error {
            TargetError::NoSuchComponent(_) => (StatusCode::NOT_FOUND, classes::NO_SUCH_EJB),
            TargetError::NoSuchMethod(_) => (StatusCode::NOT_FOUND, classes::NO_SUCH_METHOD),
            TargetError::WrongView(_) => (StatusCode::NOT_FOUND, classes::WRONG_VIEW),
            TargetError::NotStateful(_) => (StatusCode::INTERNAL_SERVER_ERROR, classes::NOT_STATEFUL),
            TargetError::SessionNotActive(_) => (StatusCode::INTERNAL_SERVER_ERROR, classes::SESSION_NOT_ACTIVE),
        };
        self.exception(peer, code, &RemoteException::new(class, error.to_string()))
    }

    fn exception(&self, peer: ProtocolVersion, code: StatusCode, exception: &RemoteException) -> Response<Bytes> {
        crate::http::exception(code, self.config.marshaller(peer), exception)
    }
}
