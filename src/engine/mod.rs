//! The storage engine: table heap files, record CRUD, secondary indexes,
//! write-ahead logging and crash recovery behind one coarse lock.
//!
//! Every public operation acquires the engine mutex, so callers on any
//! number of threads observe fully serialized operations. For each data
//! modification the engine mutates the cached page, appends and syncs the
//! matching log record, then updates indexes; dirty pages reach disk later
//! through eviction, explicit flush or shutdown, which keeps the log ahead
//! of the data at all times. If a log append fails mid-operation the engine
//! latches read-only until `recover` completes.

mod error;
#[cfg(test)]
mod tests;

pub use error::{EngineError, EngineResult};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::file::{BufferManager, FileError, FileManager, PageCodec, PageId};
use crate::index::{IndexError, IndexManager, IndexStats};
use crate::record::{self, Page, RecordError, RecordId};
use crate::txn::{TransactionId, TransactionManager};
use crate::wal::{LogRecord, RecoveryManager};

const TABLE_FILE_EXT: &str = "db";
const SCHEMA_PAGE_ID: PageId = 0;
const SCHEMA_SLOT: usize = 0;

/// Embedded storage engine over a data directory.
///
/// Owns the buffer manager (and through it the file manager), the index
/// manager, the write-ahead log and the transaction manager. Opening an
/// engine discovers existing tables and replays the log.
pub struct StorageEngine {
    inner: Mutex<EngineInner>,
}

struct EngineInner {
    config: StorageConfig,
    buffer: BufferManager,
    /// table name -> heap file name
    tables: HashMap<String, String>,
    indexes: IndexManager,
    recovery: RecoveryManager,
    transactions: TransactionManager,
    read_only: bool,
}

impl StorageEngine {
    /// Open the engine over `data_dir`, creating it if needed, then run
    /// recovery.
    pub fn open<P: AsRef<Path>>(data_dir: P, config: StorageConfig) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref();
        if config.use_encryption && config.encryption_key.is_none() {
            return Err(EngineError::MissingEncryptionKey);
        }

        let file_manager = FileManager::new(data_dir, config.page_size)?;
        let codec = PageCodec::new(
            config.use_compression,
            if config.use_encryption {
                config.encryption_key
            } else {
                None
            },
        );
        let buffer = BufferManager::new(file_manager, &config.buffer, codec);
        let recovery = RecoveryManager::open(data_dir)?;
        let indexes = IndexManager::new(config.btree_degree);

        let mut tables = HashMap::new();
        for entry in std::fs::read_dir(data_dir).map_err(FileError::from)? {
            let entry = entry.map_err(FileError::from)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_FILE_EXT) {
                if let (Some(stem), Some(name)) = (
                    path.file_stem().and_then(|s| s.to_str()),
                    path.file_name().and_then(|s| s.to_str()),
                ) {
                    tables.insert(stem.to_string(), name.to_string());
                }
            }
        }

        let inner = EngineInner {
            config,
            buffer,
            tables,
            indexes,
            recovery,
            transactions: TransactionManager::new(),
            read_only: false,
        };
        let engine = Self {
            inner: Mutex::new(inner),
        };

        {
            let mut inner = engine.inner.lock().unwrap();
            let table_count = inner.tables.len();
            inner.recover()?;
            info!(
                data_dir = %data_dir.display(),
                tables = table_count,
                "storage engine opened"
            );
        }
        Ok(engine)
    }

    /// Create a table with the given schema (one declaration per column).
    pub fn create_table(&self, table: &str, schema: &[String]) -> EngineResult<()> {
        self.inner.lock().unwrap().create_table(table, schema)
    }

    /// Drop a table: its indexes, cached pages and heap file.
    pub fn delete_table(&self, table: &str) -> EngineResult<()> {
        self.inner.lock().unwrap().delete_table(table)
    }

    /// Names of all known tables.
    pub fn table_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// The column declarations a table was created with.
    pub fn get_table_schema(&self, table: &str) -> EngineResult<Vec<String>> {
        self.inner.lock().unwrap().get_table_schema(table)
    }

    /// Insert a record, returning its record id. With `txn: None` the
    /// operation commits by itself.
    pub fn insert_record(
        &self,
        txn: Option<TransactionId>,
        table: &str,
        fields: &[String],
    ) -> EngineResult<RecordId> {
        self.inner.lock().unwrap().insert_record(txn, table, fields)
    }

    /// Read the record stored under `record_id`.
    pub fn read_record(&self, table: &str, record_id: RecordId) -> EngineResult<Vec<String>> {
        self.inner.lock().unwrap().read_record(table, record_id)
    }

    /// Update a record. Returns the record's id after the update, which
    /// changes when the record no longer fits its page in place.
    pub fn update_record(
        &self,
        txn: Option<TransactionId>,
        table: &str,
        record_id: RecordId,
        fields: &[String],
    ) -> EngineResult<RecordId> {
        self.inner
            .lock()
            .unwrap()
            .update_record(txn, table, record_id, fields)
    }

    /// Delete the record stored under `record_id`.
    pub fn delete_record(
        &self,
        txn: Option<TransactionId>,
        table: &str,
        record_id: RecordId,
    ) -> EngineResult<()> {
        self.inner
            .lock()
            .unwrap()
            .delete_record(txn, table, record_id)
    }

    /// Full-table scan: every live record as a (record id, fields) pair.
    pub fn scan_table(&self, table: &str) -> EngineResult<Vec<(RecordId, Vec<String>)>> {
        self.inner.lock().unwrap().scan_table(table)
    }

    /// Build an index on a column (by name or position) from current table
    /// data.
    pub fn create_index(&self, table: &str, column: &str) -> EngineResult<()> {
        self.inner.lock().unwrap().create_index(table, column)
    }

    /// Drop the index on a column.
    pub fn drop_index(&self, table: &str, column: &str) -> EngineResult<()> {
        self.inner.lock().unwrap().drop_index(table, column)
    }

    /// Record ids whose indexed column equals `value`.
    pub fn search_index(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> EngineResult<Vec<RecordId>> {
        self.inner.lock().unwrap().search_index(table, column, value)
    }

    /// Size and shape statistics of one index.
    pub fn index_stats(&self, table: &str, column: &str) -> EngineResult<IndexStats> {
        self.inner.lock().unwrap().index_stats(table, column)
    }

    /// Set-union merge of remote posting lists into a local index.
    pub fn merge_index(
        &self,
        table: &str,
        column: &str,
        remote: Vec<(String, Vec<RecordId>)>,
    ) -> EngineResult<()> {
        self.inner
            .lock()
            .unwrap()
            .merge_index(table, column, remote)
    }

    /// Start a transaction.
    pub fn begin_transaction(&self) -> EngineResult<TransactionId> {
        self.inner.lock().unwrap().begin_transaction()
    }

    /// Commit a transaction. Its effects survive crashes from here on.
    pub fn commit_transaction(&self, txn: TransactionId) -> EngineResult<()> {
        self.inner.lock().unwrap().commit_transaction(txn)
    }

    /// Abort a transaction, reversing its operations.
    pub fn abort_transaction(&self, txn: TransactionId) -> EngineResult<()> {
        self.inner.lock().unwrap().abort_transaction(txn)
    }

    /// Replay the write-ahead log: redo all logged operations in order,
    /// then undo those of uncommitted transactions.
    pub fn recover(&self) -> EngineResult<()> {
        self.inner.lock().unwrap().recover()
    }

    /// Write all dirty pages to disk.
    pub fn flush(&self) -> EngineResult<()> {
        Ok(self.inner.lock().unwrap().buffer.flush_all_pages()?)
    }

    /// Toggle page compression on the write-back path.
    pub fn set_compression(&self, enabled: bool) {
        let mut inner = self.inner.lock().unwrap();
        let mut codec = inner.buffer.codec().clone();
        codec.compression = enabled;
        inner.buffer.set_codec(codec);
        inner.config.use_compression = enabled;
    }

    /// Enable page encryption with `Some(key)`, or disable it with `None`.
    /// Pages already written under a different key become unreadable.
    pub fn set_encryption(&self, key: Option<[u8; 32]>) {
        let mut inner = self.inner.lock().unwrap();
        let mut codec = inner.buffer.codec().clone();
        codec.encryption_key = key;
        inner.buffer.set_codec(codec);
        inner.config.use_encryption = key.is_some();
        inner.config.encryption_key = key;
    }

    /// Bytes currently held by the buffer pool.
    pub fn buffer_size(&self) -> usize {
        self.inner.lock().unwrap().buffer.buffer_size()
    }

    /// Change the buffer pool budget in bytes.
    pub fn resize_buffer(&self, new_size: usize) -> EngineResult<()> {
        Ok(self.inner.lock().unwrap().buffer.resize_buffer(new_size)?)
    }
}

impl EngineInner {
    fn slots_per_page(&self) -> u64 {
        (self.config.page_size / 8) as u64
    }

    fn record_id_for(&self, page_id: PageId, slot: usize) -> RecordId {
        (page_id - 1) * self.slots_per_page() + slot as u64
    }

    fn locate(&self, record_id: RecordId) -> (PageId, usize) {
        let spp = self.slots_per_page();
        (record_id / spp + 1, (record_id % spp) as usize)
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        if self.read_only {
            return Err(EngineError::ReadOnly);
        }
        Ok(())
    }

    fn table_file(&self, table: &str) -> EngineResult<String> {
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    /// Append a log record; a failed append latches the engine read-only.
    fn wal_append(&mut self, record: LogRecord) -> EngineResult<()> {
        if let Err(err) = self.recovery.append(record) {
            self.read_only = true;
            warn!(%err, "log append failed; engine latched read-only");
            return Err(err.into());
        }
        Ok(())
    }

    /// Resolve the transaction for a mutating operation: join the explicit
    /// one, or begin an implicit auto-commit transaction.
    fn begin_op(
        &mut self,
        txn: Option<TransactionId>,
        op: &str,
        table: &str,
    ) -> EngineResult<(TransactionId, bool)> {
        match txn {
            Some(id) => {
                self.transactions
                    .log_operation(id, format!("{op} {table}"))?;
                Ok((id, false))
            }
            None => {
                let id = self.transactions.begin();
                self.wal_append(LogRecord::Begin { txn: id })?;
                Ok((id, true))
            }
        }
    }

    fn finish_op(&mut self, txn: TransactionId, implicit: bool) -> EngineResult<()> {
        if implicit {
            self.wal_append(LogRecord::Commit { txn })?;
            self.transactions.commit(txn)?;
        }
        Ok(())
    }

    fn create_table(&mut self, table: &str, schema: &[String]) -> EngineResult<()> {
        self.ensure_writable()?;
        if table.is_empty() || table.contains(['/', '\\', '.']) {
            return Err(EngineError::InvalidTableName(table.to_string()));
        }
        if self.tables.contains_key(table) {
            return Err(EngineError::TableExists(table.to_string()));
        }

        let file = format!("{table}.{TABLE_FILE_EXT}");
        self.buffer.file_manager_mut().create_file(&file)?;

        let result = (|| -> EngineResult<()> {
            let page_id = self.buffer.allocate_page(&file)?;
            let page = self.buffer.get_page_mut(&file, page_id)?;
            page.add_record(&record::encode_fields(schema))?;
            self.buffer.flush_page(&file, page_id)?;
            Ok(())
        })();

        if let Err(err) = result {
            self.buffer.invalidate_file(&file);
            let _ = self.buffer.file_manager_mut().remove_file(&file);
            return Err(err);
        }

        self.tables.insert(table.to_string(), file);
        info!(table, columns = schema.len(), "created table");
        Ok(())
    }

    fn delete_table(&mut self, table: &str) -> EngineResult<()> {
        self.ensure_writable()?;
        let file = self.table_file(table)?;

        self.indexes.drop_table_indexes(table);
        self.buffer.invalidate_file(&file);
        self.buffer.file_manager_mut().remove_file(&file)?;
        self.tables.remove(table);
        info!(table, "deleted table");
        Ok(())
    }

    fn get_table_schema(&mut self, table: &str) -> EngineResult<Vec<String>> {
        let file = self.table_file(table)?;
        let page = self.buffer.get_page(&file, SCHEMA_PAGE_ID)?;
        let bytes = page
            .get_record(SCHEMA_SLOT)
            .map_err(|_| EngineError::SchemaMissing(table.to_string()))?;
        Ok(record::decode_fields(bytes)?)
    }

    /// First-fit placement: try every data page from 1 up, then allocate.
    fn place_record(&mut self, file: &str, payload: &[u8]) -> EngineResult<(PageId, usize)> {
        let page_count = self.buffer.file_manager_mut().page_count(file)?;
        for page_id in 1..page_count {
            let page = self.buffer.get_page_mut(file, page_id)?;
            match page.add_record(payload) {
                Ok(slot) => return Ok((page_id, slot)),
                Err(RecordError::PageFull { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        let page_id = self.buffer.allocate_page(file)?;
        let page = self.buffer.get_page_mut(file, page_id)?;
        let slot = page.add_record(payload)?;
        Ok((page_id, slot))
    }

    fn insert_record(
        &mut self,
        txn: Option<TransactionId>,
        table: &str,
        fields: &[String],
    ) -> EngineResult<RecordId> {
        self.ensure_writable()?;
        let file = self.table_file(table)?;

        let payload = record::encode_fields(fields);
        if payload.len() > Page::max_record_len(self.config.page_size) {
            return Err(EngineError::RecordTooLarge);
        }

        let (txn_id, implicit) = self.begin_op(txn, "insert", table)?;
        let (page_id, slot) = self.place_record(&file, &payload)?;
        let record_id = self.record_id_for(page_id, slot);

        self.wal_append(LogRecord::Insert {
            txn: txn_id,
            table: table.to_string(),
            record_id,
            after: fields.to_vec(),
        })?;

        self.index_insert_all(table, fields, record_id);
        self.finish_op(txn_id, implicit)?;

        debug!(table, record_id, page_id, slot, "inserted record");
        Ok(record_id)
    }

    fn read_record(&mut self, table: &str, record_id: RecordId) -> EngineResult<Vec<String>> {
        let file = self.table_file(table)?;
        let (page_id, slot) = self.locate(record_id);

        let page_count = self.buffer.file_manager_mut().page_count(&file)?;
        if page_id >= page_count {
            return Err(EngineError::RecordNotFound {
                table: table.to_string(),
                record_id,
            });
        }

        let page = self.buffer.get_page(&file, page_id)?;
        match page.get_record(slot) {
            Ok(bytes) => Ok(record::decode_fields(bytes)?),
            Err(RecordError::InvalidSlot { .. }) => Err(EngineError::RecordNotFound {
                table: table.to_string(),
                record_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Locate a record and decode its current value (the before-image).
    fn fetch_before(
        &mut self,
        file: &str,
        table: &str,
        record_id: RecordId,
    ) -> EngineResult<(PageId, usize, Vec<String>)> {
        let (page_id, slot) = self.locate(record_id);

        let page_count = self.buffer.file_manager_mut().page_count(file)?;
        if page_id >= page_count {
            return Err(EngineError::RecordNotFound {
                table: table.to_string(),
                record_id,
            });
        }

        let page = self.buffer.get_page(file, page_id)?;
        let bytes = match page.get_record(slot) {
            Ok(bytes) => bytes,
            Err(RecordError::InvalidSlot { .. }) => {
                return Err(EngineError::RecordNotFound {
                    table: table.to_string(),
                    record_id,
                })
            }
            Err(err) => return Err(err.into()),
        };
        let before = record::decode_fields(bytes)?;
        Ok((page_id, slot, before))
    }

    fn update_record(
        &mut self,
        txn: Option<TransactionId>,
        table: &str,
        record_id: RecordId,
        fields: &[String],
    ) -> EngineResult<RecordId> {
        self.ensure_writable()?;
        let file = self.table_file(table)?;
        let (page_id, slot, before) = self.fetch_before(&file, table, record_id)?;

        let payload = record::encode_fields(fields);
        if payload.len() > Page::max_record_len(self.config.page_size) {
            return Err(EngineError::RecordTooLarge);
        }

        let (txn_id, implicit) = self.begin_op(txn, "update", table)?;

        let in_place = {
            let page = self.buffer.get_page_mut(&file, page_id)?;
            match page.update_record(slot, &payload) {
                Ok(()) => true,
                Err(RecordError::PageFull { .. }) => {
                    page.delete_record(slot)?;
                    false
                }
                Err(err) => return Err(err.into()),
            }
        };

        let new_record_id = if in_place {
            self.wal_append(LogRecord::Update {
                txn: txn_id,
                table: table.to_string(),
                record_id,
                before: before.clone(),
                after: fields.to_vec(),
            })?;
            record_id
        } else {
            // The record moved; log the relocation as delete + insert so
            // redo and undo stay physical
            let (new_page, new_slot) = self.place_record(&file, &payload)?;
            let new_record_id = self.record_id_for(new_page, new_slot);
            self.wal_append(LogRecord::Delete {
                txn: txn_id,
                table: table.to_string(),
                record_id,
                before: before.clone(),
            })?;
            self.wal_append(LogRecord::Insert {
                txn: txn_id,
                table: table.to_string(),
                record_id: new_record_id,
                after: fields.to_vec(),
            })?;
            new_record_id
        };

        self.index_remove_all(table, &before, record_id);
        self.index_insert_all(table, fields, new_record_id);
        self.finish_op(txn_id, implicit)?;

        debug!(table, record_id, new_record_id, in_place, "updated record");
        Ok(new_record_id)
    }

    fn delete_record(
        &mut self,
        txn: Option<TransactionId>,
        table: &str,
        record_id: RecordId,
    ) -> EngineResult<()> {
        self.ensure_writable()?;
        let file = self.table_file(table)?;
        let (page_id, slot, before) = self.fetch_before(&file, table, record_id)?;

        let (txn_id, implicit) = self.begin_op(txn, "delete", table)?;

        {
            let page = self.buffer.get_page_mut(&file, page_id)?;
            page.delete_record(slot)?;
        }

        self.wal_append(LogRecord::Delete {
            txn: txn_id,
            table: table.to_string(),
            record_id,
            before: before.clone(),
        })?;

        self.index_remove_all(table, &before, record_id);
        self.finish_op(txn_id, implicit)?;

        debug!(table, record_id, "deleted record");
        Ok(())
    }

    fn scan_table(&mut self, table: &str) -> EngineResult<Vec<(RecordId, Vec<String>)>> {
        let file = self.table_file(table)?;
        let spp = self.slots_per_page();
        let page_count = self.buffer.file_manager_mut().page_count(&file)?;

        let mut rows = Vec::new();
        for page_id in 1..page_count {
            let page = self.buffer.get_page(&file, page_id)?;
            for slot in 0..page.slot_count() {
                if !page.is_slot_live(slot) {
                    continue;
                }
                let fields = record::decode_fields(page.get_record(slot)?)?;
                rows.push(((page_id - 1) * spp + slot as u64, fields));
            }
        }
        Ok(rows)
    }

    /// Resolve a column reference to its schema position. Indexes are
    /// keyed by the position's string form.
    fn resolve_column(&mut self, table: &str, column: &str) -> EngineResult<usize> {
        let schema = self.get_table_schema(table)?;
        record::schema::column_position(&schema, column)
            .ok_or_else(|| {
                IndexError::ColumnNotFound {
                    table: table.to_string(),
                    column: column.to_string(),
                }
                .into()
            })
    }

    fn create_index(&mut self, table: &str, column: &str) -> EngineResult<()> {
        let position = self.resolve_column(table, column)?;
        let canonical = position.to_string();
        self.indexes.create_index(table, &canonical)?;

        let rows = match self.scan_table(table) {
            Ok(rows) => rows,
            Err(err) => {
                let _ = self.indexes.drop_index(table, &canonical);
                return Err(err);
            }
        };

        let mut postings: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for (record_id, fields) in rows {
            if let Some(value) = fields.get(position) {
                postings.entry(value.clone()).or_default().push(record_id);
            }
        }
        self.indexes
            .bulk_load(table, &canonical, postings.into_iter().collect())?;

        info!(table, column = %canonical, "built index");
        Ok(())
    }

    fn drop_index(&mut self, table: &str, column: &str) -> EngineResult<()> {
        let canonical = self.resolve_column(table, column)?.to_string();
        Ok(self.indexes.drop_index(table, &canonical)?)
    }

    fn search_index(
        &mut self,
        table: &str,
        column: &str,
        value: &str,
    ) -> EngineResult<Vec<RecordId>> {
        let canonical = self.resolve_column(table, column)?.to_string();
        Ok(self.indexes.search(table, &canonical, value)?)
    }

    fn index_stats(&mut self, table: &str, column: &str) -> EngineResult<IndexStats> {
        let canonical = self.resolve_column(table, column)?.to_string();
        Ok(self.indexes.stats(table, &canonical)?)
    }

    fn merge_index(
        &mut self,
        table: &str,
        column: &str,
        remote: Vec<(String, Vec<RecordId>)>,
    ) -> EngineResult<()> {
        let canonical = self.resolve_column(table, column)?.to_string();
        Ok(self.indexes.merge_remote(table, &canonical, remote)?)
    }

    /// Update every index of `table` with one record's field values.
    fn index_insert_all(&mut self, table: &str, fields: &[String], record_id: RecordId) {
        for (position, value) in fields.iter().enumerate() {
            let column = position.to_string();
            if self.indexes.has_index(table, &column) {
                if let Err(err) = self.indexes.insert(table, &column, value.clone(), record_id) {
                    warn!(table, column = %column, %err, "index insert failed");
                }
            }
        }
    }

    fn index_remove_all(&mut self, table: &str, fields: &[String], record_id: RecordId) {
        for (position, value) in fields.iter().enumerate() {
            let column = position.to_string();
            if self.indexes.has_index(table, &column) {
                if let Err(err) = self.indexes.remove(table, &column, value, record_id) {
                    warn!(table, column = %column, %err, "index remove failed");
                }
            }
        }
    }

    fn begin_transaction(&mut self) -> EngineResult<TransactionId> {
        self.ensure_writable()?;
        let txn = self.transactions.begin();
        self.wal_append(LogRecord::Begin { txn })?;
        Ok(txn)
    }

    fn commit_transaction(&mut self, txn: TransactionId) -> EngineResult<()> {
        self.ensure_writable()?;
        self.transactions.ensure_active(txn)?;
        self.wal_append(LogRecord::Commit { txn })?;
        self.transactions.commit(txn)?;
        Ok(())
    }

    fn abort_transaction(&mut self, txn: TransactionId) -> EngineResult<()> {
        self.ensure_writable()?;
        self.transactions.ensure_active(txn)?;
        self.wal_append(LogRecord::Abort { txn })?;
        self.transactions.abort(txn)?;

        let to_undo: Vec<LogRecord> = self
            .recovery
            .records()
            .iter()
            .filter(|record| record.txn() == txn && record.is_data_op())
            .cloned()
            .collect();
        for record in to_undo.iter().rev() {
            self.undo_record(record)?;
        }

        debug!(txn, undone = to_undo.len(), "transaction aborted");
        Ok(())
    }

    /// Redo every logged operation in order, then undo those of
    /// uncommitted transactions in reverse. Slot writes are physical
    /// upserts, so replaying an arbitrarily long prefix of history is
    /// idempotent.
    fn recover(&mut self) -> EngineResult<()> {
        let records: Vec<LogRecord> = self.recovery.records().to_vec();
        if records.is_empty() {
            self.read_only = false;
            return Ok(());
        }

        let committed = self.recovery.committed_transactions();

        let mut redone = 0;
        for record in &records {
            match record {
                LogRecord::Insert {
                    table,
                    record_id,
                    after,
                    ..
                }
                | LogRecord::Update {
                    table,
                    record_id,
                    after,
                    ..
                } => {
                    self.apply_write(table, *record_id, after)?;
                    redone += 1;
                }
                LogRecord::Delete {
                    table, record_id, ..
                } => {
                    self.apply_clear(table, *record_id)?;
                    redone += 1;
                }
                _ => {}
            }
        }

        let mut undone = 0;
        for record in records.iter().rev() {
            if record.is_data_op() && !committed.contains(&record.txn()) {
                self.undo_record(record)?;
                undone += 1;
            }
        }

        self.buffer.flush_all_pages()?;
        self.read_only = false;
        info!(records = records.len(), redone, undone, "recovery complete");
        Ok(())
    }

    fn undo_record(&mut self, record: &LogRecord) -> EngineResult<()> {
        match record {
            LogRecord::Insert {
                table, record_id, ..
            } => self.apply_clear(table, *record_id),
            LogRecord::Update {
                table,
                record_id,
                before,
                ..
            }
            | LogRecord::Delete {
                table,
                record_id,
                before,
                ..
            } => self.apply_write(table, *record_id, before),
            _ => Ok(()),
        }
    }

    /// Physically write a record image at its record id, allocating pages
    /// as needed. Overwriting an existing image or rewriting an identical
    /// one is fine, which is what makes replay idempotent.
    fn apply_write(
        &mut self,
        table: &str,
        record_id: RecordId,
        fields: &[String],
    ) -> EngineResult<()> {
        let Some(file) = self.tables.get(table).cloned() else {
            return Ok(());
        };
        let (page_id, slot) = self.locate(record_id);

        while self.buffer.file_manager_mut().page_count(&file)? <= page_id {
            self.buffer.allocate_page(&file)?;
        }

        let old = {
            let page = self.buffer.get_page(&file, page_id)?;
            if page.is_slot_live(slot) {
                Some(record::decode_fields(page.get_record(slot)?)?)
            } else {
                None
            }
        };

        let payload = record::encode_fields(fields);
        {
            let page = self.buffer.get_page_mut(&file, page_id)?;
            page.write_slot(slot, &payload)?;
        }

        if let Some(old_fields) = old {
            self.index_remove_all(table, &old_fields, record_id);
        }
        self.index_insert_all(table, fields, record_id);
        Ok(())
    }

    /// Physically clear a record id if present; a no-op otherwise.
    fn apply_clear(&mut self, table: &str, record_id: RecordId) -> EngineResult<()> {
        let Some(file) = self.tables.get(table).cloned() else {
            return Ok(());
        };
        let (page_id, slot) = self.locate(record_id);

        if self.buffer.file_manager_mut().page_count(&file)? <= page_id {
            return Ok(());
        }

        let old = {
            let page = self.buffer.get_page(&file, page_id)?;
            if page.is_slot_live(slot) {
                Some(record::decode_fields(page.get_record(slot)?)?)
            } else {
                None
            }
        };

        {
            let page = self.buffer.get_page_mut(&file, page_id)?;
            page.clear_slot(slot)?;
        }

        if let Some(old_fields) = old {
            self.index_remove_all(table, &old_fields, record_id);
        }
        Ok(())
    }
}
