//! Write-ahead log.
//!
//! Every data-modifying operation appends a record here before its page is
//! written back to disk: the append is synced before the call returns,
//! while dirty pages only reach disk later through flush or eviction. On
//! disk the log is a stream of `u32` length-prefixed JSON frames; a
//! truncated trailing frame (torn append) is treated as end-of-log when the
//! file is reopened.
//!
//! Recovery is driven by the storage engine: it pulls the record snapshot,
//! redoes after-images in log order, then undoes uncommitted transactions
//! in reverse using before-images.

mod error;

pub use error::{WalError, WalResult};

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::record::RecordId;
use crate::txn::TransactionId;

/// File name of the log inside the data directory
pub const LOG_FILE_NAME: &str = "recovery.log";

const FRAME_PREFIX: usize = 4;

/// One entry in the write-ahead log.
///
/// Data operations carry the images needed to replay them in either
/// direction: the after-image for redo, the before-image for undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Begin {
        txn: TransactionId,
    },
    Commit {
        txn: TransactionId,
    },
    Abort {
        txn: TransactionId,
    },
    Insert {
        txn: TransactionId,
        table: String,
        record_id: RecordId,
        after: Vec<String>,
    },
    Update {
        txn: TransactionId,
        table: String,
        record_id: RecordId,
        before: Vec<String>,
        after: Vec<String>,
    },
    Delete {
        txn: TransactionId,
        table: String,
        record_id: RecordId,
        before: Vec<String>,
    },
}

impl LogRecord {
    /// Transaction this record belongs to
    pub fn txn(&self) -> TransactionId {
        match self {
            LogRecord::Begin { txn }
            | LogRecord::Commit { txn }
            | LogRecord::Abort { txn }
            | LogRecord::Insert { txn, .. }
            | LogRecord::Update { txn, .. }
            | LogRecord::Delete { txn, .. } => *txn,
        }
    }

    /// Whether this record describes a data modification
    pub fn is_data_op(&self) -> bool {
        matches!(
            self,
            LogRecord::Insert { .. } | LogRecord::Update { .. } | LogRecord::Delete { .. }
        )
    }
}

/// Append-only log file plus an in-memory mirror of its records.
pub struct RecoveryManager {
    path: PathBuf,
    file: File,
    records: Vec<LogRecord>,
}

impl RecoveryManager {
    /// Open (or create) the log in `data_dir`, loading all intact records.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> WalResult<Self> {
        let path = data_dir.as_ref().join(LOG_FILE_NAME);
        let mut records = Vec::new();

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let mut pos = 0;
            while pos + FRAME_PREFIX <= bytes.len() {
                let len =
                    u32::from_le_bytes(bytes[pos..pos + FRAME_PREFIX].try_into().unwrap()) as usize;
                let start = pos + FRAME_PREFIX;
                if start + len > bytes.len() {
                    warn!(offset = pos, "truncated trailing log record ignored");
                    break;
                }
                match serde_json::from_slice(&bytes[start..start + len]) {
                    Ok(record) => records.push(record),
                    Err(err) => {
                        warn!(offset = pos, %err, "unreadable log record treated as end-of-log");
                        break;
                    }
                }
                pos = start + len;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(records = records.len(), path = %path.display(), "write-ahead log opened");
        Ok(Self {
            path,
            file,
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record and sync it to disk before returning.
    pub fn append(&mut self, record: LogRecord) -> WalResult<()> {
        let payload = serde_json::to_vec(&record)?;
        if payload.len() > u32::MAX as usize {
            return Err(WalError::RecordTooLarge(payload.len()));
        }

        let mut frame = Vec::with_capacity(FRAME_PREFIX + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        self.records.push(record);
        Ok(())
    }

    pub fn log_begin(&mut self, txn: TransactionId) -> WalResult<()> {
        self.append(LogRecord::Begin { txn })
    }

    pub fn log_commit(&mut self, txn: TransactionId) -> WalResult<()> {
        self.append(LogRecord::Commit { txn })
    }

    pub fn log_abort(&mut self, txn: TransactionId) -> WalResult<()> {
        self.append(LogRecord::Abort { txn })
    }

    /// All records, oldest first
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Transaction ids with a COMMIT record in the log
    pub fn committed_transactions(&self) -> HashSet<TransactionId> {
        self.records
            .iter()
            .filter_map(|record| match record {
                LogRecord::Commit { txn } => Some(*txn),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_record(txn: TransactionId, record_id: RecordId) -> LogRecord {
        LogRecord::Insert {
            txn,
            table: "t".to_string(),
            record_id,
            after: vec!["1".to_string(), "alice".to_string()],
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let mut wal = RecoveryManager::open(temp_dir.path()).unwrap();
            wal.log_begin(1).unwrap();
            wal.append(insert_record(1, 0)).unwrap();
            wal.log_commit(1).unwrap();
            assert_eq!(wal.len(), 3);
        }

        let wal = RecoveryManager::open(temp_dir.path()).unwrap();
        assert_eq!(wal.len(), 3);
        assert_eq!(wal.records()[0], LogRecord::Begin { txn: 1 });
        assert_eq!(wal.records()[1], insert_record(1, 0));
        assert_eq!(wal.records()[2], LogRecord::Commit { txn: 1 });
        assert_eq!(
            wal.committed_transactions(),
            std::iter::once(1).collect::<HashSet<_>>()
        );
    }

    #[test]
    fn test_images_round_trip_losslessly() {
        let temp_dir = tempfile::tempdir().unwrap();
        let record = LogRecord::Update {
            txn: 4,
            table: "t".to_string(),
            record_id: 17,
            before: vec!["line one\nline two".to_string()],
            after: vec!["naïve café".to_string()],
        };

        {
            let mut wal = RecoveryManager::open(temp_dir.path()).unwrap();
            wal.append(record.clone()).unwrap();
        }

        let wal = RecoveryManager::open(temp_dir.path()).unwrap();
        assert_eq!(wal.records(), &[record]);
    }

    #[test]
    fn test_truncated_tail_tolerated() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let mut wal = RecoveryManager::open(temp_dir.path()).unwrap();
            wal.log_begin(1).unwrap();
            wal.append(insert_record(1, 0)).unwrap();
        }

        // Simulate a torn append: a frame header promising more bytes than
        // are on disk
        let path = temp_dir.path().join(LOG_FILE_NAME);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[200u8, 0, 0, 0, b'{']).unwrap();
        drop(file);

        let wal = RecoveryManager::open(temp_dir.path()).unwrap();
        assert_eq!(wal.len(), 2);
    }

    #[test]
    fn test_appends_continue_after_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();

        {
            let mut wal = RecoveryManager::open(temp_dir.path()).unwrap();
            wal.log_begin(1).unwrap();
        }
        {
            let mut wal = RecoveryManager::open(temp_dir.path()).unwrap();
            wal.log_commit(1).unwrap();
        }

        let wal = RecoveryManager::open(temp_dir.path()).unwrap();
        assert_eq!(wal.len(), 2);
        assert_eq!(wal.records()[1], LogRecord::Commit { txn: 1 });
    }
}
