use thiserror::Error;

use crate::file::FileError;
use crate::index::IndexError;
use crate::record::{RecordError, RecordId};
use crate::txn::TxnError;
use crate::wal::WalError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table {0} already exists")]
    TableExists(String),

    #[error("table {0} not found")]
    TableNotFound(String),

    #[error("record {record_id} not found in table {table}")]
    RecordNotFound { table: String, record_id: RecordId },

    #[error("record does not fit in an empty page")]
    RecordTooLarge,

    #[error("table {0} has no schema record")]
    SchemaMissing(String),

    #[error("invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("engine is read-only until recovery completes")]
    ReadOnly,

    #[error("encryption enabled without a key")]
    MissingEncryptionKey,

    #[error("file error: {0}")]
    File(#[from] FileError),

    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("log error: {0}")]
    Wal(#[from] WalError),

    #[error("transaction error: {0}")]
    Txn(#[from] TxnError),
}

pub type EngineResult<T> = Result<T, EngineError>;
