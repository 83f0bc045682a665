use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("log encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("log record too large: {0} bytes")]
    RecordTooLarge(usize),
}

pub type WalResult<T> = Result<T, WalError>;
