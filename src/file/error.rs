use std::io;
use thiserror::Error;

use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file already exists: {0}")]
    FileAlreadyExists(String),

    #[error("page {page_id} is out of bounds in {file} ({page_count} pages)")]
    PageOutOfBounds {
        file: String,
        page_id: u64,
        page_count: u64,
    },

    #[error("short read of page {page_id} in {file}: {actual} of {expected} bytes")]
    ShortRead {
        file: String,
        page_id: u64,
        expected: usize,
        actual: usize,
    },

    #[error("invalid page image size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("page {page_id} of {file} is not cached")]
    PageNotCached { file: String, page_id: u64 },

    #[error("page is encrypted but no encryption key is configured")]
    MissingEncryptionKey,

    #[error("buffer capacity must be at least one page")]
    InvalidBufferSize,

    #[error("record error: {0}")]
    Record(#[from] RecordError),
}

pub type FileResult<T> = Result<T, FileError>;
