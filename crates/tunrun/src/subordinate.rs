//! # Subordinate Transaction Client
//!
//! Drives one transaction branch living on a remote service through the two
//! commit phases. Each primitive is a single POST of the branch Xid to a
//! sub-path of `/txn/v1`.
//!
//! ## Failure Mapping
//! - **Transport**: no response at all becomes `XAER_RMERR` with the transport
//!   error as its source.
//! - **Interrupt**: raising the handle's `Interrupt` while waiting becomes an
//!   interrupted `XAER_RMERR`. The flag stays raised for the caller.
//! - **Remote XA**: a marshalled XA exception is returned with its own code.
//! - **Anything Else**: wrapped as `XAER_RMERR`.

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use http::Request;
use http::Response;
use http::header;
use tunrpc::PrepareOutcome;
use tunrpc::XaError;
use tunrpc::Xid;
use tunrpc::constants;
use tunrpc::xa;

use crate::context::HttpTargetContext;
use crate::http::header_str;
use crate::transaction::Interrupt;

pub type Result<T> = std::result::Result<T, XaError>;

pub struct HttpSubordinateTransactionHandle {
    xid: Xid,
    context: Arc<HttpTargetContext>,
    interrupt: Interrupt,
}

impl HttpSubordinateTransactionHandle {
    pub fn new(xid: Xid, context: Arc<HttpTargetContext>) -> Self {
        Self { xid, context, interrupt: Interrupt::new() }
    }

    /// Shares `interrupt` with the caller so it can abandon a pending primitive.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn xid(&self) -> &Xid {
        &self.xid
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    #[tracing::instrument(skip(self), fields(xid = %self.xid))]
    pub async fn commit(&self, one_phase: bool) -> Result<()> {
        self.process(constants::XA_COMMIT_PATH, one_phase).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(xid = %self.xid))]
    pub async fn rollback(&self) -> Result<()> {
        self.process(constants::XA_ROLLBACK_PATH, false).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(xid = %self.xid))]
    pub async fn before_completion(&self) -> Result<()> {
        self.process(constants::XA_BEFORE_COMPLETION_PATH, false).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(xid = %self.xid))]
    pub async fn forget(&self) -> Result<()> {
        self.process(constants::XA_FORGET_PATH, false).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(xid = %self.xid))]
    pub async fn prepare(&self) -> Result<PrepareOutcome> {
        let response = self.process(constants::XA_PREPARE_PATH, false).await?;
        let read_only = header_str(response.headers(), constants::READ_ONLY_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        Ok(if read_only { PrepareOutcome::ReadOnly } else { PrepareOutcome::Ok })
    }

    /// Branch suspension is not supported over this transport; always succeeds.
    pub fn end(&self, _flags: i32) -> Result<()> {
        Ok(())
    }

    fn request(&self, path: &str, one_phase: bool) -> Result<Request<Bytes>> {
        let mut out = self.context.marshaller();
        self.xid.write_to(out.as_mut()).map_err(XaError::rm_error)?;
        let body = out.finish().map_err(|e| XaError::rm_error(tunrpc::Error::from(e)))?;

        let query = if one_phase { format!("?{}", constants::ONE_PHASE_QUERY) } else { String::new() };
        let uri = self.context.uri(&format!("{}{}{}", constants::TXN_CONTEXT, path, query));
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, constants::XID.to_string())
            .header(header::ACCEPT, constants::EXCEPTION.to_string())
            .body(Bytes::from(body))
            .map_err(XaError::rm_error)
    }

    async fn process(&self, path: &str, one_phase: bool) -> Result<Response<Bytes>> {
        let request = self.request(path, one_phase)?;
        let response = tokio::select! {
            biased;
            _ = self.interrupt.interrupted() => {
                tracing::debug!(path, "interrupted while awaiting outcome");
                return Err(XaError::interrupted());
            }
            response = self.context.send(request) => response.map_err(XaError::rm_error)?,
        };

        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.remote_failure(&response))
    }

    fn remote_failure(&self, response: &Response<Bytes>) -> XaError {
        match self.context.read_exception(response) {
            Some(remote) => match XaError::from_remote(&remote) {
                Some(e) => e,
                None => XaError::new(xa::XAER_RMERR, remote.to_string()).with_source(remote),
            },
            None => XaError::new(xa::XAER_RMERR, format!("unexpected status {}", response.status())),
        }
    }
}
