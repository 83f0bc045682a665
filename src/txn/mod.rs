//! Transaction identity and state tracking.
//!
//! This manager is an identity and status oracle: it allocates ids, tracks
//! the per-transaction state machine and records operation descriptions.
//! Applying and reversing data changes is the storage engine's job, in
//! concert with the write-ahead log.

mod error;

pub use error::{TxnError, TxnResult};

use std::collections::HashMap;

use tracing::debug;

/// Transaction identifier, drawn from a counter starting at 1
pub type TransactionId = u64;

/// Transaction lifecycle. Both exits from `Active` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

/// One transaction's identity, state and operation log
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    operations: Vec<String>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[String] {
        &self.operations
    }
}

/// Allocates transaction ids and tracks per-transaction state.
pub struct TransactionManager {
    next_id: TransactionId,
    transactions: HashMap<TransactionId, Transaction>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            transactions: HashMap::new(),
        }
    }

    /// Start a new transaction and return its id.
    pub fn begin(&mut self) -> TransactionId {
        let id = self.next_id;
        self.next_id += 1;
        self.transactions.insert(
            id,
            Transaction {
                id,
                state: TransactionState::Active,
                operations: Vec::new(),
            },
        );
        debug!(txn = id, "transaction started");
        id
    }

    fn get(&self, id: TransactionId) -> TxnResult<&Transaction> {
        self.transactions.get(&id).ok_or(TxnError::NotFound(id))
    }

    fn get_active_mut(&mut self, id: TransactionId) -> TxnResult<&mut Transaction> {
        let txn = self
            .transactions
            .get_mut(&id)
            .ok_or(TxnError::NotFound(id))?;
        if txn.state != TransactionState::Active {
            return Err(TxnError::NotActive {
                id,
                state: txn.state,
            });
        }
        Ok(txn)
    }

    /// Fail unless the transaction exists and is active.
    pub fn ensure_active(&self, id: TransactionId) -> TxnResult<()> {
        let txn = self.get(id)?;
        if txn.state != TransactionState::Active {
            return Err(TxnError::NotActive {
                id,
                state: txn.state,
            });
        }
        Ok(())
    }

    /// Transition an active transaction to `Committed`.
    pub fn commit(&mut self, id: TransactionId) -> TxnResult<()> {
        let txn = self.get_active_mut(id)?;
        txn.state = TransactionState::Committed;
        debug!(txn = id, "transaction committed");
        Ok(())
    }

    /// Transition an active transaction to `Aborted`.
    pub fn abort(&mut self, id: TransactionId) -> TxnResult<()> {
        let txn = self.get_active_mut(id)?;
        txn.state = TransactionState::Aborted;
        debug!(txn = id, "transaction aborted");
        Ok(())
    }

    /// Record an operation description against an active transaction.
    pub fn log_operation(&mut self, id: TransactionId, operation: String) -> TxnResult<()> {
        let txn = self.get_active_mut(id)?;
        txn.operations.push(operation);
        Ok(())
    }

    pub fn state(&self, id: TransactionId) -> Option<TransactionState> {
        self.transactions.get(&id).map(|txn| txn.state)
    }

    pub fn operations(&self, id: TransactionId) -> TxnResult<&[String]> {
        Ok(self.get(id)?.operations())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
