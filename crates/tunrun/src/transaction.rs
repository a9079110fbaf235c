//! # Transactions
//!
//! The collaborators the runtime needs for transactional work: importing the
//! caller's transaction on the server, terminating subordinate branches, and a
//! cooperative interrupt for callers awaiting an outcome.
//!
//! `LocalTransactionManager` is an in-process implementation of both server
//! roles, keyed by Xid.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::watch;
use tunrpc::PrepareOutcome;
use tunrpc::XaError;
use tunrpc::Xid;
use tunrpc::xa;

pub type Result<T> = std::result::Result<T, XaError>;

/// A transaction the local side is participating in.
pub trait Transaction: Send + Sync + 'static {
    fn xid(&self) -> &Xid;

    /// Records that work was done under this transaction.
    fn enlist(&self) {}
}

/// Finds the local counterpart of a caller's transaction, importing it on first sight.
#[async_trait::async_trait]
pub trait TransactionManager: Send + Sync + 'static {
    async fn find_or_import(&self, xid: &Xid, remaining_timeout: i32) -> Result<Arc<dyn Transaction>>;
}

/// Drives an imported branch to completion on behalf of a remote coordinator.
#[async_trait::async_trait]
pub trait XaTerminator: Send + Sync + 'static {
    async fn prepare(&self, xid: &Xid) -> Result<PrepareOutcome>;
    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()>;
    async fn rollback(&self, xid: &Xid) -> Result<()>;
    async fn before_completion(&self, xid: &Xid) -> Result<()>;
    async fn forget(&self, xid: &Xid) -> Result<()>;
}

/// A sticky interrupt flag, shared by clones.
///
/// Once raised it stays raised until `clear` is called, so a caller that was
/// interrupted mid-operation still observes the interrupt afterwards.
#[derive(Clone)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    pub fn interrupt(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.flag.borrow()
    }

    /// Lowers the flag, returning whether it was raised.
    pub fn clear(&self) -> bool {
        self.flag.send_replace(false)
    }

    /// Resolves once the flag is raised.
    pub async fn interrupted(&self) {
        let mut rx = self.flag.subscribe();
        let _ = rx.wait_for(|raised| *raised).await;
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Interrupt").field(&self.is_interrupted()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    Active,
    BeforeCompletion,
    Prepared,
}

pub struct LocalTransaction {
    xid: Xid,
    deadline: Instant,
    state: Mutex<LocalState>,
}

struct LocalState {
    branch: BranchState,
    work: usize,
}

impl LocalTransaction {
    fn new(xid: Xid, timeout: Duration) -> Self {
        Self {
            xid,
            deadline: Instant::now() + timeout,
            state: Mutex::new(LocalState { branch: BranchState::Active, work: 0 }),
        }
    }

    pub fn state(&self) -> BranchState {
        self.lock().branch
    }

    pub fn work(&self) -> usize {
        self.lock().work
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        // state updates never panic midway, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Transaction for LocalTransaction {
    fn xid(&self) -> &Xid {
        &self.xid
    }

    fn enlist(&self) {
        self.lock().work += 1;
    }
}

/// In-process transaction manager and terminator.
#[derive(Default)]
pub struct LocalTransactionManager {
    transactions: DashMap<Xid, Arc<LocalTransaction>>,
}

impl LocalTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, xid: &Xid) -> Option<Arc<LocalTransaction>> {
        self.transactions.get(xid).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn require(&self, xid: &Xid) -> Result<Arc<LocalTransaction>> {
        self.get(xid)
            .ok_or_else(|| XaError::new(xa::XAER_NOTA, format!("unknown transaction {}", xid)))
    }

    fn finish(&self, xid: &Xid) {
        self.transactions.remove(xid);
    }
}

#[async_trait::async_trait]
impl TransactionManager for LocalTransactionManager {
    async fn find_or_import(&self, xid: &Xid, remaining_timeout: i32) -> Result<Arc<dyn Transaction>> {
        let secs = u64::try_from(remaining_timeout)
            .map_err(|_| XaError::new(xa::XAER_INVAL, format!("negative timeout {}", remaining_timeout)))?;
        let transaction = self
            .transactions
            .entry(xid.clone())
            .or_insert_with(|| {
                tracing::debug!(%xid, secs, "importing transaction");
                Arc::new(LocalTransaction::new(xid.clone(), Duration::from_secs(secs)))
            })
            .value()
            .clone();
        if transaction.state() != BranchState::Active {
            return Err(XaError::new(xa::XAER_PROTO, format!("transaction {} is completing", xid)));
        }
        Ok(transaction)
    }
}

#[async_trait::async_trait]
impl XaTerminator for LocalTransactionManager {
    async fn prepare(&self, xid: &Xid) -> Result<PrepareOutcome> {
        let transaction = self.require(xid)?;
        if transaction.is_expired() {
            self.finish(xid);
            return Err(XaError::new(xa::XA_RBROLLBACK, format!("transaction {} timed out", xid)));
        }
        let mut state = transaction.lock();
        if state.branch == BranchState::Prepared {
            return Err(XaError::new(xa::XAER_PROTO, format!("transaction {} already prepared", xid)));
        }
        if state.work == 0 {
            drop(state);
            self.finish(xid);
            return Ok(PrepareOutcome::ReadOnly);
        }
        state.branch = BranchState::Prepared;
        Ok(PrepareOutcome::Ok)
    }

    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()> {
        let transaction = self.require(xid)?;
        let branch = transaction.state();
        match (one_phase, branch) {
            (true, BranchState::Prepared) | (false, BranchState::Active | BranchState::BeforeCompletion) => {
                return Err(XaError::new(
                    xa::XAER_PROTO,
                    format!("commit(one_phase={}) in state {:?}", one_phase, branch),
                ));
            }
            _ => {}
        }
        self.finish(xid);
        if one_phase && transaction.is_expired() {
            return Err(XaError::new(xa::XA_RBROLLBACK, format!("transaction {} timed out", xid)));
        }
        Ok(())
    }

    async fn rollback(&self, xid: &Xid) -> Result<()> {
        self.require(xid)?;
        self.finish(xid);
        Ok(())
    }

    async fn before_completion(&self, xid: &Xid) -> Result<()> {
        let transaction = self.require(xid)?;
        let mut state = transaction.lock();
        match state.branch {
            BranchState::Active | BranchState::BeforeCompletion => {
                state.branch = BranchState::BeforeCompletion;
                Ok(())
            }
            BranchState::Prepared => Err(XaError::new(xa::XAER_PROTO, format!("transaction {} already prepared", xid))),
        }
    }

    async fn forget(&self, xid: &Xid) -> Result<()> {
        self.require(xid)?;
        self.finish(xid);
        Ok(())
    }
}
