//! Correlated request tracking
//!
//! A [`Transaction`] is one request awaiting exactly one outcome. The
//! [`TransactionRegistry`] maps ids to pending transactions and settles each
//! one exactly once, through whichever of these happens first:
//!
//! ```text
//!                 ┌──────── resolve(id, response) ──► Resolved
//!   create() ─► Pending ─── reject(id, error) ──────► Rejected
//!                 ├──────── timer elapses ──────────► TimedOut
//!                 └──────── reject_all(closed) ─────► Rejected
//! ```
//!
//! Settlement removes the entry from the map before delivering the outcome,
//! so a late or duplicate response finds nothing and is a no-op.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{SignalingError, SignalingResult};
use crate::message::ResponseMessage;

/// Length of generated transaction ids
pub const TRANSACTION_ID_LEN: usize = 12;

/// Default response window
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Opaque random transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a random 12-character alphanumeric id
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TRANSACTION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Resolved,
    Rejected,
    TimedOut,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Metadata of one pending call
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub created_at: Instant,
    pub timeout: Duration,
}

impl Transaction {
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}

struct PendingTransaction {
    transaction: Transaction,
    responder: oneshot::Sender<SignalingResult<ResponseMessage>>,
    timer: Option<JoinHandle<()>>,
}

/// Awaitable side of a transaction
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionId,
    receiver: oneshot::Receiver<SignalingResult<ResponseMessage>>,
}

impl TransactionHandle {
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Wait for the single outcome of this transaction
    pub async fn wait(self) -> SignalingResult<ResponseMessage> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SignalingError::ConnectionClosed),
        }
    }
}

/// Id-indexed set of pending transactions
///
/// Clones share the same map. Creating a transaction spawns its timeout
/// timer, so [`create`](Self::create) must run inside a tokio runtime.
#[derive(Clone, Default)]
pub struct TransactionRegistry {
    pending: Arc<DashMap<TransactionId, PendingTransaction>>,
}

impl fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transaction and start its timer
    pub fn create(&self, timeout: Duration) -> TransactionHandle {
        let mut id = TransactionId::generate();
        while self.pending.contains_key(&id) {
            id = TransactionId::generate();
        }

        let (responder, receiver) = oneshot::channel();
        let transaction = Transaction { id: id.clone(), created_at: Instant::now(), timeout };
        self.pending
            .insert(id.clone(), PendingTransaction { transaction, responder, timer: None });

        let registry = self.clone();
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            registry.expire(&timer_id);
        });
        if let Some(mut entry) = self.pending.get_mut(&id) {
            entry.timer = Some(timer);
        }

        debug!(transaction = %id, timeout_ms = timeout.as_millis() as u64, "Transaction created");
        TransactionHandle { id, receiver }
    }

    /// Deliver a response; `false` when the id is unknown or already settled
    pub fn resolve(&self, id: &TransactionId, response: ResponseMessage) -> bool {
        self.settle(id, TransactionStatus::Resolved, Ok(response))
    }

    /// Deliver an error; `false` when the id is unknown or already settled
    pub fn reject(&self, id: &TransactionId, error: SignalingError) -> bool {
        self.settle(id, TransactionStatus::Rejected, Err(error))
    }

    /// Reject every pending transaction and empty the registry
    pub fn reject_all(&self, error: SignalingError) -> usize {
        let ids: Vec<TransactionId> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter(|id| self.settle(id, TransactionStatus::Rejected, Err(error.clone())))
            .count()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot of pending transactions
    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.iter().map(|e| e.value().transaction.clone()).collect()
    }

    fn expire(&self, id: &TransactionId) {
        let Some(timeout) = self.pending.get(id).map(|e| e.transaction.timeout) else {
            return;
        };
        let error = SignalingError::Timeout {
            transaction: id.clone(),
            duration_ms: timeout.as_millis() as u64,
        };
        self.settle(id, TransactionStatus::TimedOut, Err(error));
    }

    fn settle(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
        outcome: SignalingResult<ResponseMessage>,
    ) -> bool {
        let Some((_, pending)) = self.pending.remove(id) else {
            trace!(transaction = %id, ?status, "Ignoring outcome for settled transaction");
            return false;
        };

        if status != TransactionStatus::TimedOut {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
        }

        debug!(
            transaction = %id,
            ?status,
            elapsed_ms = pending.transaction.elapsed().as_millis() as u64,
            "Transaction settled"
        );
        // the waiter may have gone away; the entry is settled either way
        let _ = pending.responder.send(outcome);
        true
    }
}
