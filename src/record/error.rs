use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("page is full: need {needed} bytes, {free} free")]
    PageFull { needed: usize, free: usize },

    #[error("invalid slot {slot} on page {page_id}")]
    InvalidSlot { page_id: u64, slot: usize },

    #[error("checksum mismatch on page {page_id}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        page_id: u64,
        stored: u32,
        computed: u32,
    },

    #[error("corrupted page data: {0}")]
    Corrupted(String),

    #[error("page payload is compressed or encrypted")]
    PageSealed,

    #[error("cannot compress an encrypted page")]
    CompressAfterEncrypt,

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("page image exceeds the {page_size}-byte envelope")]
    Oversize { page_size: usize },

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
