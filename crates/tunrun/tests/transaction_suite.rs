//! Subordinate transaction client against stub and real transaction services.

use std::error::Error as _;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::HeaderValue;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use tunpack::DefaultClassResolver;
use tunpack::MarshallerFactory;
use tunpack::PackFactory;
use tunpack::Value;
use tunrpc::InvocationPath;
use tunrpc::PrepareOutcome;
use tunrpc::ProtocolV1ObjectTable;
use tunrpc::RemoteException;
use tunrpc::TransactionDescriptor;
use tunrpc::Xid;
use tunrpc::constants;
use tunrpc::exception::classes;
use tunrpc::xa;

use tunrun::Association;
use tunrun::HttpHandler;
use tunrun::HttpSubordinateTransactionHandle;
use tunrun::HttpTargetContext;
use tunrun::HttpTransport;
use tunrun::Invocable;
use tunrun::InvocationClient;
use tunrun::InvocationHandler;
use tunrun::InvocationOutcome;
use tunrun::LoopbackTransport;
use tunrun::PathRouter;
use tunrun::ProtocolVersionHandler;
use tunrun::ServiceConfig;
use tunrun::TransactionHandler;
use tunrun::TransportError;
use tunrun::association::Locator;
use tunrun::association::MethodLocator;
use tunrun::association::ResolvedInvocation;
use tunrun::association::TargetError;
use tunrun::cancel::CancelHandle;
use tunrun::client::ClientError;
use tunrun::client::InvocationCall;
use tunrun::transaction::Interrupt;
use tunrun::transaction::LocalTransactionManager;
use tunrun::transaction::Transaction;
use tunrun::transaction::TransactionManager;
use tunrun::transport;

// ============================================================================
//  FIXTURES
// ============================================================================

const ROOT: &str = "http://localhost:8080/wildfly-services";

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunrun=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

fn xid(branch: &str) -> Xid {
    Xid::new(0x20, b"coordinator-tx-1".to_vec(), branch.as_bytes().to_vec()).unwrap()
}

/// Everything a stub service saw of one request.
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: Option<String>,
    content_type: Option<String>,
    accept: Option<String>,
    xid: Xid,
}

/// Records each request and answers with a canned response.
struct Stub {
    seen: Mutex<Vec<Seen>>,
    reply: Box<dyn Fn() -> Response<Bytes> + Send + Sync>,
}

impl Stub {
    fn new(reply: impl Fn() -> Response<Bytes> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self { seen: Mutex::new(Vec::new()), reply: Box::new(reply) })
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HttpHandler for Stub {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let text = |name: header::HeaderName| {
            request.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
        };
        let mut input = PackFactory.create_unmarshaller(
            Arc::new(DefaultClassResolver),
            Arc::new(ProtocolV1ObjectTable),
            request.body().to_vec(),
        );
        let seen = Seen {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            content_type: text(header::CONTENT_TYPE),
            accept: text(header::ACCEPT),
            xid: Xid::read_from(input.as_mut()).unwrap(),
        };
        self.seen.lock().unwrap().push(seen);
        (self.reply)()
    }
}

fn ok() -> Response<Bytes> {
    Response::new(Bytes::new())
}

fn failure(code: StatusCode, exception: Option<RemoteException>) -> Response<Bytes> {
    let Some(exception) = exception else {
        let mut response = ok();
        *response.status_mut() = code;
        return response;
    };
    let out = PackFactory.create_marshaller(Arc::new(DefaultClassResolver), Arc::new(ProtocolV1ObjectTable));
    tunrun::http::exception(code, out, &exception)
}

fn stubbed(stub: Arc<Stub>) -> Arc<HttpTargetContext> {
    Arc::new(HttpTargetContext::new(ROOT, Arc::new(LoopbackTransport::new(ROOT, stub))))
}

struct Unreachable;

#[async_trait::async_trait]
impl HttpTransport for Unreachable {
    async fn send(&self, _request: Request<Bytes>) -> transport::Result<Response<Bytes>> {
        Err(TransportError::ConnectionLost("connection refused".into()))
    }
}

/// Never answers.
struct Hanging;

#[async_trait::async_trait]
impl HttpTransport for Hanging {
    async fn send(&self, _request: Request<Bytes>) -> transport::Result<Response<Bytes>> {
        std::future::pending().await
    }
}

// ============================================================================
//  WIRE FORMAT
// ============================================================================

#[tokio::test]
async fn test_prepare_read_only() -> Result<()> {
    init_test_logging();
    let stub = Stub::new(|| {
        let mut response = ok();
        response.headers_mut().insert(constants::READ_ONLY_HEADER, HeaderValue::from_static("TRUE"));
        response
    });
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub.clone()));

    assert_eq!(handle.prepare().await?, PrepareOutcome::ReadOnly);
    assert_eq!(handle.prepare().await?.code(), xa::XA_RDONLY);

    let seen = stub.seen();
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].path, "/txn/v1/xa/prep");
    assert_eq!(seen[0].content_type.as_deref(), Some("application/x-wf-jbmar-xid;version=1"));
    assert_eq!(seen[0].accept.as_deref(), Some("application/x-wf-jbmar-exception;version=1"));
    assert_eq!(seen[0].xid, xid("b1"));
    Ok(())
}

#[tokio::test]
async fn test_prepare_without_header_is_ok() -> Result<()> {
    let stub = Stub::new(ok);
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub));
    assert_eq!(handle.prepare().await?, PrepareOutcome::Ok);
    Ok(())
}

#[tokio::test]
async fn test_primitive_paths() -> Result<()> {
    let stub = Stub::new(ok);
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub.clone()));

    handle.commit(true).await?;
    handle.commit(false).await?;
    handle.rollback().await?;
    handle.before_completion().await?;
    handle.forget().await?;

    let seen: Vec<(String, Option<String>)> = stub.seen().into_iter().map(|s| (s.path, s.query)).collect();
    assert_eq!(
        seen,
        vec![
            ("/txn/v1/xa/commit".to_string(), Some("opc=true".to_string())),
            ("/txn/v1/xa/commit".to_string(), None),
            ("/txn/v1/xa/rollback".to_string(), None),
            ("/txn/v1/xa/bc".to_string(), None),
            ("/txn/v1/xa/forget".to_string(), None),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_end_is_noop() -> Result<()> {
    let stub = Stub::new(ok);
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub.clone()));
    handle.end(0x0400_0000)?;
    assert!(stub.seen().is_empty());
    Ok(())
}

// ============================================================================
//  FAILURE MAPPING
// ============================================================================

#[tokio::test]
async fn test_err_one_phase_commit_transport_failure() {
    let context = Arc::new(HttpTargetContext::new(ROOT, Arc::new(Unreachable)));
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), context);

    let err = handle.commit(true).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_RMERR);
    assert!(!err.is_interrupted());
    let cause = err.source().and_then(|s| s.downcast_ref::<TransportError>());
    assert_eq!(cause, Some(&TransportError::ConnectionLost("connection refused".into())));
}

#[tokio::test]
async fn test_err_remote_xa_code_rethrown() {
    let stub = Stub::new(|| {
        let remote = RemoteException::new(classes::XA_EXCEPTION, "heuristic mixed").with_error_code(xa::XA_HEURMIX);
        failure(StatusCode::INTERNAL_SERVER_ERROR, Some(remote))
    });
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub));
    let err = handle.commit(false).await.err().unwrap();
    assert_eq!(err.code(), xa::XA_HEURMIX);
    assert_eq!(err.message(), "heuristic mixed");
}

#[tokio::test]
async fn test_err_other_remote_failure_wrapped() {
    let stub = Stub::new(|| {
        failure(StatusCode::INTERNAL_SERVER_ERROR, Some(RemoteException::new(classes::RUNTIME, "disk full")))
    });
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub));
    let err = handle.rollback().await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_RMERR);
    let cause = err.source().and_then(|s| s.downcast_ref::<RemoteException>());
    assert_eq!(cause.map(|c| c.class.as_str()), Some(classes::RUNTIME));
}

#[tokio::test]
async fn test_err_bare_status_wrapped() {
    let stub = Stub::new(|| failure(StatusCode::SERVICE_UNAVAILABLE, None));
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub));
    let err = handle.forget().await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_RMERR);
    assert!(err.message().contains("503"));
}

#[tokio::test]
async fn test_err_interrupt_while_waiting() -> Result<()> {
    let context = Arc::new(HttpTargetContext::new(ROOT, Arc::new(Hanging)));
    let interrupt = Interrupt::new();
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), context).with_interrupt(interrupt.clone());

    let raiser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.interrupt();
    });
    let err = tokio::time::timeout(Duration::from_secs(5), handle.prepare()).await?.err().unwrap();
    raiser.await?;

    assert_eq!(err.code(), xa::XAER_RMERR);
    assert!(err.is_interrupted());
    assert!(handle.interrupt().is_interrupted());
    Ok(())
}

#[tokio::test]
async fn test_err_already_interrupted() {
    let stub = Stub::new(ok);
    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), stubbed(stub.clone()));
    handle.interrupt().interrupt();
    let err = handle.commit(false).await.err().unwrap();
    assert!(err.is_interrupted());
    assert!(stub.seen().is_empty());
}

// ============================================================================
//  TRANSACTION SERVICE
// ============================================================================

/// Enlists in the imported transaction, if any, and reports whether it did.
struct Enlisting;

#[async_trait::async_trait]
impl Invocable for Enlisting {
    async fn invoke(&self, invocation: ResolvedInvocation, _cancel: CancelHandle) -> InvocationOutcome {
        match &invocation.imported {
            Some(transaction) => {
                transaction.enlist();
                InvocationOutcome::Success(Value::Bool(true))
            }
            None => InvocationOutcome::Success(Value::Bool(false)),
        }
    }
}

struct Ledger;

impl Association for Ledger {
    fn locate(&self, locator: &Locator, _method: &MethodLocator) -> Result<Arc<dyn Invocable>, TargetError> {
        if locator.component.component == "LedgerBean" {
            Ok(Arc::new(Enlisting))
        } else {
            Err(TargetError::NoSuchComponent(locator.component.clone()))
        }
    }
}

struct Node {
    handler: Arc<dyn HttpHandler>,
    manager: Arc<LocalTransactionManager>,
}

impl Node {
    fn new() -> Self {
        let manager = Arc::new(LocalTransactionManager::new());
        let config = ServiceConfig::default();
        let invoke = InvocationHandler::new(config.clone(), Arc::new(Ledger)).with_transaction_manager(manager.clone());
        let txn = TransactionHandler::new(config, manager.clone());
        let router = PathRouter::new()
            .route(constants::INVOKE_PATH, invoke)
            .route(constants::TXN_CONTEXT, txn);
        Self { handler: Arc::new(ProtocolVersionHandler::new(router)), manager }
    }

    fn context(&self) -> Arc<HttpTargetContext> {
        Arc::new(HttpTargetContext::new(ROOT, Arc::new(LoopbackTransport::new(ROOT, self.handler.clone()))))
    }

    async fn post(&self, path: &str, content_type: &str, body: Vec<u8>) -> Response<Bytes> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("{}{}", constants::TXN_CONTEXT, path))
            .header(header::CONTENT_TYPE, content_type)
            .body(Bytes::from(body))
            .unwrap();
        self.handler.handle(request).await
    }
}

fn record(xid: Xid, timeout: i32) -> InvocationCall {
    let path = InvocationPath::new("bank", "ledger", "", "LedgerBean", "com.example.LedgerRemote", "record")
        .with_parameter("int");
    InvocationCall::new(path)
        .parameter(Value::Int(100))
        .transaction(TransactionDescriptor::new(xid, timeout))
}

#[tokio::test]
async fn test_two_phase_commit_end_to_end() -> Result<()> {
    init_test_logging();
    let node = Node::new();
    let context = node.context();

    let reply = InvocationClient::new(context.clone()).invoke(record(xid("b1"), 30)).await?;
    assert_eq!(reply.result, Value::Bool(true));
    assert_eq!(node.manager.get(&xid("b1")).map(|t| t.work()), Some(1));

    let handle = HttpSubordinateTransactionHandle::new(xid("b1"), context);
    handle.before_completion().await?;
    assert_eq!(handle.prepare().await?, PrepareOutcome::Ok);
    handle.commit(false).await?;
    assert!(node.manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_one_phase_commit_end_to_end() -> Result<()> {
    let node = Node::new();
    let context = node.context();
    InvocationClient::new(context.clone()).invoke(record(xid("b2"), 30)).await?;

    HttpSubordinateTransactionHandle::new(xid("b2"), context).commit(true).await?;
    assert!(node.manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_idle_branch_votes_read_only() -> Result<()> {
    let node = Node::new();
    node.manager.find_or_import(&xid("idle"), 30).await?;

    let handle = HttpSubordinateTransactionHandle::new(xid("idle"), node.context());
    assert_eq!(handle.prepare().await?, PrepareOutcome::ReadOnly);
    assert!(node.manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_err_unknown_branch_from_service() {
    let node = Node::new();
    let handle = HttpSubordinateTransactionHandle::new(xid("ghost"), node.context());
    let err = handle.prepare().await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_NOTA);
    assert!(!err.is_interrupted());
}

#[tokio::test]
async fn test_err_import_failure_reported() {
    let node = Node::new();
    let err = InvocationClient::new(node.context()).invoke(record(xid("b3"), -1)).await.err().unwrap();
    let remote = match err {
        ClientError::Remote(remote) => remote,
        other => panic!("expected a remote exception, got {}", other),
    };
    assert_eq!(remote.class, classes::ILLEGAL_STATE);
    let cause = remote.cause.as_deref().unwrap();
    assert_eq!(cause.class, classes::XA_EXCEPTION);
    assert_eq!(cause.error_code, Some(xa::XAER_INVAL));
    assert!(node.manager.is_empty());
}

#[tokio::test]
async fn test_err_service_rejects_bad_requests() {
    let node = Node::new();
    let mut out = PackFactory.create_marshaller(Arc::new(DefaultClassResolver), Arc::new(ProtocolV1ObjectTable));
    xid("b1").write_to(out.as_mut()).unwrap();
    let body = out.finish().unwrap();

    let response = node.post("/xa/prep", "application/octet-stream", body.clone()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = node.post("/xa/nope", &constants::XID.to_string(), body).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_err_malformed_xid_carries_exception() {
    let node = Node::new();
    let response = node.post("/xa/prep", &constants::XID.to_string(), vec![0, 0]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()[header::CONTENT_TYPE], constants::EXCEPTION.to_string());

    let remote = node.context().read_exception(&response).unwrap();
    assert_eq!(remote.class, classes::STREAM_CORRUPTED);
    assert!(node.manager.is_empty());
}
