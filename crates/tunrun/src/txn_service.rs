//! # Transaction Service
//!
//! Server side of the subordinate transaction protocol. Mounted at `/txn/v1`;
//! every primitive is a POST whose body is the marshalled branch Xid.
//!
//! | path         | primitive                            |
//! |--------------|--------------------------------------|
//! | `/xa/prep`   | prepare, read-only vote in a header  |
//! | `/xa/commit` | commit, `?opc=true` for one phase    |
//! | `/xa/rollback` | rollback                           |
//! | `/xa/bc`     | before completion                    |
//! | `/xa/forget` | forget                               |

use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use tunrpc::PrepareOutcome;
use tunrpc::ProtocolVersion;
use tunrpc::RemoteException;
use tunrpc::XaError;
use tunrpc::Xid;
use tunrpc::constants;
use tunrpc::exception::classes;
use tunrpc::version::PROTOCOL_VERSION_HEADER;

use crate::config::ServiceConfig;
use crate::http::HttpHandler;
use crate::http::header_str;
use crate::http::status;
use crate::transaction::XaTerminator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Prepare,
    Commit { one_phase: bool },
    Rollback,
    BeforeCompletion,
    Forget,
}

impl Primitive {
    fn parse(path: &str, query: Option<&str>) -> Option<Self> {
        let primitive = match path.trim_end_matches('/') {
            constants::XA_PREPARE_PATH => Self::Prepare,
            constants::XA_COMMIT_PATH => {
                let one_phase = query
                    .into_iter()
                    .flat_map(|q| q.split('&'))
                    .any(|pair| pair.eq_ignore_ascii_case(constants::ONE_PHASE_QUERY));
                Self::Commit { one_phase }
            }
            constants::XA_ROLLBACK_PATH => Self::Rollback,
            constants::XA_BEFORE_COMPLETION_PATH => Self::BeforeCompletion,
            constants::XA_FORGET_PATH => Self::Forget,
            _ => return None,
        };
        Some(primitive)
    }
}

pub struct TransactionHandler {
    config: ServiceConfig,
    terminator: Arc<dyn XaTerminator>,
}

impl TransactionHandler {
    pub fn new(config: ServiceConfig, terminator: Arc<dyn XaTerminator>) -> Self {
        Self { config, terminator }
    }

    async fn run(&self, primitive: Primitive, xid: &Xid) -> Result<Option<PrepareOutcome>, XaError> {
        tracing::debug!(%xid, ?primitive, "transaction primitive");
        match primitive {
            Primitive::Prepare => return self.terminator.prepare(xid).await.map(Some),
            Primitive::Commit { one_phase } => self.terminator.commit(xid, one_phase).await?,
            Primitive::Rollback => self.terminator.rollback(xid).await?,
            Primitive::BeforeCompletion => self.terminator.before_completion(xid).await?,
            Primitive::Forget => self.terminator.forget(xid).await?,
        }
        Ok(None)
    }
}

#[async_trait::async_trait]
impl HttpHandler for TransactionHandler {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if request.method() != Method::POST {
            return status(StatusCode::METHOD_NOT_ALLOWED);
        }
        let Some(primitive) = Primitive::parse(request.uri().path(), request.uri().query()) else {
            tracing::debug!(path = %request.uri().path(), "unknown transaction primitive");
            return status(StatusCode::NOT_FOUND);
        };

        let content_type = header_str(request.headers(), header::CONTENT_TYPE.as_str());
        if let Err(e) = constants::XID.expect(content_type) {
            tracing::debug!(error = %e, "rejecting transaction primitive");
            return status(StatusCode::BAD_REQUEST);
        }

        let peer = header_str(request.headers(), PROTOCOL_VERSION_HEADER)
            .map(ProtocolVersion::from_header)
            .unwrap_or(ProtocolVersion::V1);
        let mut input = self.config.unmarshaller(peer, request.into_body().to_vec());
        let xid = match Xid::read_from(input.as_mut()).and_then(|xid| {
            input.finish()?;
            Ok(xid)
        }) {
            Ok(xid) => xid,
            Err(e) => {
                tracing::debug!(error = %e, "malformed xid");
                let failure = RemoteException::new(classes::STREAM_CORRUPTED, e.to_string());
                return crate::http::exception(StatusCode::BAD_REQUEST, self.config.marshaller(peer), &failure);
            }
        };

        match self.run(primitive, &xid).await {
            Ok(Some(PrepareOutcome::ReadOnly)) => {
                let mut response = status(StatusCode::OK);
                response
                    .headers_mut()
                    .insert(constants::READ_ONLY_HEADER, HeaderValue::from_static("true"));
                response
            }
            Ok(_) => status(StatusCode::OK),
            Err(e) => {
                tracing::warn!(%xid, ?primitive, error = %e, "transaction primitive failed");
                crate::http::exception(StatusCode::INTERNAL_SERVER_ERROR, self.config.marshaller(peer), &e.to_remote())
            }
        }
    }
}
