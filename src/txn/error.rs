use thiserror::Error;

use super::{TransactionId, TransactionState};

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    #[error("transaction {id} is not active (state: {state:?})")]
    NotActive {
        id: TransactionId,
        state: TransactionState,
    },
}

pub type TxnResult<T> = Result<T, TxnError>;
