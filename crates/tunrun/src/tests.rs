use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::Request;
use http::Response;
use http::StatusCode;
use http::header;
use tunpack::ClassResolver;
use tunrpc::PrepareOutcome;
use tunrpc::ProtocolVersion;
use tunrpc::Xid;
use tunrpc::constants;
use tunrpc::version::PROTOCOL_VERSION_HEADER;
use tunrpc::xa;

use crate::cancel::CancelHandle;
use crate::cancel::CancelOutcome;
use crate::cancel::CancellationRegistry;
use crate::cancel::InvocationIdentifier;
use crate::cancel::Registration;
use crate::config::DEFAULT_CANCEL_WAIT;
use crate::config::DEFAULT_MAX_WORKERS;
use crate::config::ServiceConfig;
use crate::http::HttpHandler;
use crate::http::PathRouter;
use crate::http::cookie;
use crate::http::status;
use crate::negotiate::ProtocolVersionHandler;
use crate::transaction::BranchState;
use crate::transaction::Interrupt;
use crate::transaction::Transaction;
use crate::transaction::LocalTransactionManager;
use crate::transaction::TransactionManager;
use crate::transaction::XaTerminator;
use crate::worker::WorkerPool;

// ============================================================================
//  HELPERS
// ============================================================================

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunrun=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

fn id(request: &str) -> InvocationIdentifier {
    InvocationIdentifier::new(request, "node1.session")
}

fn xid(branch: &str) -> Xid {
    Xid::new(0x4a42, b"global".to_vec(), branch.as_bytes().to_vec()).unwrap()
}

fn request(method: Method, uri: &str) -> Request<Bytes> {
    Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap()
}

/// Answers with its name and the path it was handed.
struct Named(&'static str);

#[async_trait::async_trait]
impl HttpHandler for Named {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let body = format!("{} {}", self.0, request.uri());
        Response::new(Bytes::from(body))
    }
}

fn body(response: &Response<Bytes>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}

// ============================================================================
//  HEADERS
// ============================================================================

#[test]
fn test_cookie_found_among_several() {
    let mut headers = HeaderMap::new();
    headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
    headers.append(header::COOKIE, HeaderValue::from_static("a=1; JSESSIONID=\"abc.node1\"; b=2"));
    assert_eq!(cookie(&headers, "JSESSIONID"), Some("abc.node1"));
    assert_eq!(cookie(&headers, "missing"), None);
}

#[test]
fn test_identifier_needs_id_and_cookie() {
    let mut headers = HeaderMap::new();
    headers.insert(constants::INVOCATION_ID_HEADER, HeaderValue::from_static("42"));
    assert_eq!(InvocationIdentifier::from_headers(&headers), None);

    headers.insert(header::COOKIE, HeaderValue::from_static("JSESSIONID=s1"));
    assert_eq!(InvocationIdentifier::from_headers(&headers), Some(InvocationIdentifier::new("42", "s1")));

    headers.remove(constants::INVOCATION_ID_HEADER);
    assert_eq!(InvocationIdentifier::from_headers(&headers), None);
}

// ============================================================================
//  CANCEL HANDLE
// ============================================================================

#[test]
fn test_cancel_upgrades_but_never_downgrades() {
    let handle = CancelHandle::new();
    assert!(!handle.is_cancelled());

    handle.cancel(false);
    assert!(handle.is_cancelled());
    assert!(!handle.is_aggressive());

    handle.cancel(true);
    assert!(handle.is_aggressive());

    handle.cancel(false);
    assert!(handle.is_aggressive());
}

#[tokio::test]
async fn test_first_acknowledgement_wins() {
    let handle = CancelHandle::new();
    handle.acknowledge(true);
    handle.acknowledge(false);
    assert_eq!(handle.wait_acknowledged(Duration::from_millis(10)).await, Some(true));
}

#[tokio::test]
async fn test_unacknowledged_wait_is_unknown() {
    let handle = CancelHandle::new();
    assert_eq!(handle.wait_acknowledged(Duration::from_millis(10)).await, None);
}

#[tokio::test]
async fn test_cancelled_wakes_waiter() -> Result<()> {
    let handle = CancelHandle::new();
    let waiter = handle.clone();
    let task = tokio::spawn(async move { waiter.cancelled().await });
    handle.cancel(false);
    tokio::time::timeout(Duration::from_secs(1), task).await??;
    Ok(())
}

// ============================================================================
//  CANCELLATION REGISTRY
// ============================================================================

#[test]
fn test_remove_is_idempotent() {
    let registry = CancellationRegistry::new();
    registry.register(id("1"), CancelHandle::new());
    assert!(registry.contains(&id("1")));
    assert!(registry.remove(&id("1")));
    assert!(!registry.remove(&id("1")));
    assert!(registry.is_empty());
}

#[test]
fn test_register_is_last_write_wins() {
    let registry = CancellationRegistry::new();
    let first = CancelHandle::new();
    let second = CancelHandle::new();
    assert!(registry.register(id("1"), first).is_none());
    assert!(registry.register(id("1"), second.clone()).is_some());
    assert_eq!(registry.len(), 1);

    registry.get(&id("1")).unwrap().cancel(true);
    assert!(second.is_aggressive());
}

#[test]
fn test_stale_registration_leaves_newer_entry() {
    let registry = Arc::new(CancellationRegistry::new());
    let mut older = Registration::new(registry.clone(), id("1"), CancelHandle::new());
    let newer = Registration::new(registry.clone(), id("1"), CancelHandle::new());

    older.release();
    assert!(registry.contains(&id("1")));

    drop(newer);
    assert!(!registry.contains(&id("1")));
}

#[test]
fn test_registration_released_once() {
    let registry = Arc::new(CancellationRegistry::new());
    let mut registration = Registration::new(registry.clone(), id("1"), CancelHandle::new());
    assert!(registry.contains(&id("1")));

    registration.release();
    registration.release();
    drop(registration);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_registry_cancel_outcomes() {
    init_test_logging();
    let registry = CancellationRegistry::new();
    let wait = Duration::from_millis(20);

    assert_eq!(registry.cancel(&id("absent"), false, wait).await, CancelOutcome::NotFound);

    let silent = CancelHandle::new();
    registry.register(id("silent"), silent.clone());
    assert_eq!(registry.cancel(&id("silent"), false, wait).await, CancelOutcome::Unknown);
    assert!(silent.is_cancelled());

    let answering = CancelHandle::new();
    registry.register(id("answering"), answering.clone());
    let target = answering.clone();
    tokio::spawn(async move {
        target.cancelled().await;
        target.acknowledge(true);
    });
    assert_eq!(
        registry.cancel(&id("answering"), true, Duration::from_secs(1)).await,
        CancelOutcome::Acknowledged
    );
    assert!(answering.is_aggressive());
}

// ============================================================================
//  CANCEL HANDLER
// ============================================================================

#[tokio::test]
async fn test_cancel_handler_statuses() {
    let registry = Arc::new(CancellationRegistry::new());
    let handler = crate::cancel::CancelHandler::new(registry.clone(), Duration::from_millis(20));

    let response = handler.handle(request(Method::POST, "/app/mod/-/Bean/7")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = handler.handle(request(Method::DELETE, "/app/mod/-/Bean")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = handler.handle(request(Method::DELETE, "/app/mod/-/Bean/7")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut missing = request(Method::DELETE, "/app/mod/-/Bean/7");
    missing.headers_mut().insert(header::COOKIE, HeaderValue::from_static("JSESSIONID=node1.session"));
    assert_eq!(handler.handle(missing).await.status(), StatusCode::NOT_FOUND);

    let handle = CancelHandle::new();
    registry.register(id("7"), handle.clone());
    let mut pending = request(Method::DELETE, "/app/mod/-/Bean/7/true");
    pending.headers_mut().insert(header::COOKIE, HeaderValue::from_static("JSESSIONID=node1.session"));
    assert_eq!(handler.handle(pending).await.status(), StatusCode::ACCEPTED);
    assert!(handle.is_aggressive());
}

// ============================================================================
//  ROUTING AND VERSION PROBE
// ============================================================================

#[tokio::test]
async fn test_router_prefers_longest_prefix() {
    let router = PathRouter::new()
        .route("/ejb", Named("ejb"))
        .route("/ejb/v1/invoke", Named("invoke"));

    let response = router.handle(request(Method::POST, "/ejb/v1/invoke/a/b?x=1")).await;
    assert_eq!(body(&response), "invoke /a/b?x=1");

    let response = router.handle(request(Method::POST, "/ejb/v1/cancel/a")).await;
    assert_eq!(body(&response), "ejb /v1/cancel/a");
}

#[tokio::test]
async fn test_router_matches_whole_segments_only() {
    let router = PathRouter::new().route("/txn/v1", Named("txn"));
    let response = router.handle(request(Method::POST, "/txn/v10/xa/prep")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.handle(request(Method::POST, "/txn/v1")).await;
    assert_eq!(body(&response), "txn /");
}

#[tokio::test]
async fn test_version_header_only_when_probed() {
    let handler = ProtocolVersionHandler::new(Named("inner"));

    let response = handler.handle(request(Method::POST, "/x")).await;
    assert!(!response.headers().contains_key(PROTOCOL_VERSION_HEADER));

    let mut probed = request(Method::POST, "/x");
    probed.headers_mut().insert(PROTOCOL_VERSION_HEADER, HeaderValue::from_static("1"));
    let response = handler.handle(probed).await;
    assert_eq!(response.headers()[PROTOCOL_VERSION_HEADER], "2");
}

#[test]
fn test_status_has_empty_body() {
    let response = status(StatusCode::NOT_FOUND);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.body().is_empty());
}

// ============================================================================
//  CONFIGURATION
// ============================================================================

#[test]
fn test_config_defaults() {
    let config = ServiceConfig::default();
    assert_eq!(config.max_workers(), DEFAULT_MAX_WORKERS);
    assert_eq!(config.cancel_wait(), DEFAULT_CANCEL_WAIT);
    assert!(!config.ee_namespace_interop());
}

#[test]
fn test_config_builder_clamps_workers() {
    let config = ServiceConfig::builder()
        .max_workers(0)
        .cancel_wait(Duration::from_millis(250))
        .ee_namespace_interop(true)
        .build();
    assert_eq!(config.max_workers(), 1);
    assert_eq!(config.cancel_wait(), Duration::from_millis(250));
    assert!(config.ee_namespace_interop());
}

#[test]
fn test_resolver_filters_local_names() -> Result<()> {
    let config = ServiceConfig::builder()
        .class_filter(|name| !name.starts_with("jakarta.ejb.Evil"))
        .ee_namespace_interop(true)
        .build();

    let legacy = config.resolver(ProtocolVersion::V1);
    assert_eq!(legacy.resolve_class("javax.ejb.EJBException")?, "jakarta.ejb.EJBException");
    assert!(legacy.resolve_class("javax.ejb.EvilGadget").is_err());
    assert_eq!(legacy.annotate_class("jakarta.ejb.EJBException"), "javax.ejb.EJBException");

    let current = config.resolver(ProtocolVersion::V2);
    assert_eq!(current.resolve_class("javax.ejb.EJBException")?, "javax.ejb.EJBException");
    assert!(current.resolve_class("jakarta.ejb.EvilGadget").is_err());
    Ok(())
}

#[test]
fn test_resolver_without_interop_never_translates() -> Result<()> {
    let config = ServiceConfig::default();
    let legacy = config.resolver(ProtocolVersion::V1);
    assert_eq!(legacy.resolve_class("javax.ejb.EJBException")?, "javax.ejb.EJBException");
    Ok(())
}

// ============================================================================
//  WORKERS
// ============================================================================

#[tokio::test]
async fn test_worker_pool_holds_slot_until_done() -> Result<()> {
    let pool = WorkerPool::new(2);
    let (release, wait) = tokio::sync::oneshot::channel::<()>();
    let running = pool
        .spawn(async move {
            let _ = wait.await;
            7
        })
        .await
        .expect("pool open");
    assert_eq!(pool.available(), 1);

    let _ = release.send(());
    assert_eq!(running.await?, 7);
    assert_eq!(pool.available(), 2);
    Ok(())
}

#[tokio::test]
async fn test_worker_pool_queues_before_spawning() -> Result<()> {
    let pool = WorkerPool::new(1);
    let (release, wait) = tokio::sync::oneshot::channel::<()>();
    let first = pool
        .spawn(async move {
            let _ = wait.await;
        })
        .await
        .expect("pool open");

    let queued = pool.clone();
    let second = tokio::spawn(async move { queued.spawn(async { 2 }).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished());
    assert_eq!(pool.available(), 0);

    let _ = release.send(());
    first.await?;
    let task = tokio::time::timeout(Duration::from_secs(1), second).await??.expect("pool open");
    assert_eq!(task.await?, 2);
    assert_eq!(pool.available(), 1);
    Ok(())
}

// ============================================================================
//  INTERRUPT
// ============================================================================

#[tokio::test]
async fn test_interrupt_is_sticky() -> Result<()> {
    let interrupt = Interrupt::new();
    let shared = interrupt.clone();
    let waiter = tokio::spawn(async move { shared.interrupted().await });

    interrupt.interrupt();
    tokio::time::timeout(Duration::from_secs(1), waiter).await??;
    assert!(interrupt.is_interrupted());

    // a second wait resolves immediately
    tokio::time::timeout(Duration::from_millis(50), interrupt.interrupted()).await?;

    assert!(interrupt.clear());
    assert!(!interrupt.is_interrupted());
    assert!(!interrupt.clear());
    Ok(())
}

// ============================================================================
//  LOCAL TRANSACTIONS
// ============================================================================

#[tokio::test]
async fn test_import_is_idempotent() -> Result<()> {
    let manager = LocalTransactionManager::new();
    let first = manager.find_or_import(&xid("b1"), 30).await?;
    let second = manager.find_or_import(&xid("b1"), 30).await?;
    assert_eq!(first.xid(), second.xid());
    assert_eq!(manager.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_err_negative_timeout() {
    let manager = LocalTransactionManager::new();
    let err = manager.find_or_import(&xid("b1"), -1).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_INVAL);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_prepare_without_work_is_read_only() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 30).await?;
    assert_eq!(manager.prepare(&xid("b1")).await?, PrepareOutcome::ReadOnly);
    assert!(manager.get(&xid("b1")).is_none());
    Ok(())
}

#[tokio::test]
async fn test_two_phase_commit() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 30).await?.enlist();
    manager.before_completion(&xid("b1")).await?;
    assert_eq!(manager.get(&xid("b1")).map(|t| t.state()), Some(BranchState::BeforeCompletion));

    assert_eq!(manager.prepare(&xid("b1")).await?, PrepareOutcome::Ok);
    assert_eq!(manager.get(&xid("b1")).map(|t| t.state()), Some(BranchState::Prepared));

    let err = manager.find_or_import(&xid("b1"), 30).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_PROTO);

    manager.commit(&xid("b1"), false).await?;
    assert!(manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_one_phase_commit() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 30).await?.enlist();
    assert_eq!(manager.get(&xid("b1")).map(|t| t.work()), Some(1));
    manager.commit(&xid("b1"), true).await?;
    assert!(manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_err_commit_out_of_order() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 30).await?.enlist();

    let err = manager.commit(&xid("b1"), false).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_PROTO);

    manager.prepare(&xid("b1")).await?;
    let err = manager.commit(&xid("b1"), true).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_PROTO);

    let err = manager.prepare(&xid("b1")).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_PROTO);

    let err = manager.before_completion(&xid("b1")).await.err().unwrap();
    assert_eq!(err.code(), xa::XAER_PROTO);
    Ok(())
}

#[tokio::test]
async fn test_err_unknown_branch() {
    let manager = LocalTransactionManager::new();
    assert_eq!(manager.prepare(&xid("nope")).await.err().map(|e| e.code()), Some(xa::XAER_NOTA));
    assert_eq!(manager.commit(&xid("nope"), true).await.err().map(|e| e.code()), Some(xa::XAER_NOTA));
    assert_eq!(manager.rollback(&xid("nope")).await.err().map(|e| e.code()), Some(xa::XAER_NOTA));
    assert_eq!(manager.forget(&xid("nope")).await.err().map(|e| e.code()), Some(xa::XAER_NOTA));
}

#[tokio::test]
async fn test_expired_branch_rolls_back() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 0).await?.enlist();
    let err = manager.prepare(&xid("b1")).await.err().unwrap();
    assert_eq!(err.code(), xa::XA_RBROLLBACK);
    assert!(manager.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rollback_and_forget_remove() -> Result<()> {
    let manager = LocalTransactionManager::new();
    manager.find_or_import(&xid("b1"), 30).await?;
    manager.find_or_import(&xid("b2"), 30).await?;
    manager.rollback(&xid("b1")).await?;
    manager.forget(&xid("b2")).await?;
    assert!(manager.is_empty());
    Ok(())
}
