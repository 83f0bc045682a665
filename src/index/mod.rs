//! Secondary index management.
//!
//! Each index maps one column's values to the record ids carrying them,
//! through an in-memory B-tree. Indexes are keyed by (table, column
//! position) and rebuilt from table data on demand; they are not persisted.

mod error;

pub use error::{IndexError, IndexResult};

use std::collections::HashMap;

use tracing::debug;

use crate::btree::BTree;
use crate::record::RecordId;

/// Size and shape statistics for one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Total (value, record id) entries
    pub entries: usize,
    /// Distinct values
    pub keys: usize,
    /// B-tree height
    pub height: usize,
    /// B-tree node count
    pub nodes: usize,
}

type PostingTree = BTree<String, Vec<RecordId>>;

/// Manages the in-memory B-tree indexes of all tables.
pub struct IndexManager {
    degree: usize,
    indexes: HashMap<(String, String), PostingTree>,
}

impl IndexManager {
    pub fn new(degree: usize) -> Self {
        Self {
            degree,
            indexes: HashMap::new(),
        }
    }

    fn key(table: &str, column: &str) -> (String, String) {
        (table.to_string(), column.to_string())
    }

    fn tree(&self, table: &str, column: &str) -> IndexResult<&PostingTree> {
        self.indexes
            .get(&Self::key(table, column))
            .ok_or_else(|| IndexError::IndexMissing {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn tree_mut(&mut self, table: &str, column: &str) -> IndexResult<&mut PostingTree> {
        self.indexes
            .get_mut(&Self::key(table, column))
            .ok_or_else(|| IndexError::IndexMissing {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Create an empty index on (table, column).
    pub fn create_index(&mut self, table: &str, column: &str) -> IndexResult<()> {
        let key = Self::key(table, column);
        if self.indexes.contains_key(&key) {
            return Err(IndexError::IndexExists {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        self.indexes.insert(key, BTree::new(self.degree)?);
        debug!(table, column, "created index");
        Ok(())
    }

    /// Drop the index on (table, column).
    pub fn drop_index(&mut self, table: &str, column: &str) -> IndexResult<()> {
        self.indexes
            .remove(&Self::key(table, column))
            .map(|_| ())
            .ok_or_else(|| IndexError::IndexMissing {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Drop every index belonging to `table`.
    pub fn drop_table_indexes(&mut self, table: &str) {
        self.indexes.retain(|(t, _), _| t != table);
    }

    pub fn has_index(&self, table: &str, column: &str) -> bool {
        self.indexes.contains_key(&Self::key(table, column))
    }

    /// Columns of `table` that currently have an index.
    pub fn indexed_columns(&self, table: &str) -> Vec<String> {
        let mut columns: Vec<String> = self
            .indexes
            .keys()
            .filter(|(t, _)| t == table)
            .map(|(_, c)| c.clone())
            .collect();
        columns.sort();
        columns
    }

    /// Add `record_id` to the posting list for `value`, preserving
    /// uniqueness.
    pub fn insert(
        &mut self,
        table: &str,
        column: &str,
        value: String,
        record_id: RecordId,
    ) -> IndexResult<()> {
        let tree = self.tree_mut(table, column)?;
        match tree.get_mut(&value) {
            Some(ids) => {
                if !ids.contains(&record_id) {
                    ids.push(record_id);
                }
            }
            None => tree.insert(value, vec![record_id]),
        }
        Ok(())
    }

    /// Remove `record_id` from the posting list for `value`. Removing an
    /// absent entry is a no-op.
    pub fn remove(
        &mut self,
        table: &str,
        column: &str,
        value: &str,
        record_id: RecordId,
    ) -> IndexResult<()> {
        let tree = self.tree_mut(table, column)?;
        if let Some(ids) = tree.get_mut(&value.to_string()) {
            ids.retain(|id| *id != record_id);
        }
        Ok(())
    }

    /// Exact-match lookup: the record ids whose indexed column equals
    /// `value`.
    pub fn search(&self, table: &str, column: &str, value: &str) -> IndexResult<Vec<RecordId>> {
        let tree = self.tree(table, column)?;
        Ok(tree
            .search(&value.to_string())
            .cloned()
            .unwrap_or_default())
    }

    /// Load a pre-sorted batch of (value, record ids) entries.
    pub fn bulk_load(
        &mut self,
        table: &str,
        column: &str,
        entries: Vec<(String, Vec<RecordId>)>,
    ) -> IndexResult<()> {
        let count = entries.len();
        let tree = self.tree_mut(table, column)?;
        tree.bulk_load(entries)?;
        debug!(table, column, keys = count, "bulk-loaded index");
        Ok(())
    }

    /// Merge remote posting lists into the local index: per key, the
    /// resulting list is the set union of both sides.
    pub fn merge_remote(
        &mut self,
        table: &str,
        column: &str,
        remote: Vec<(String, Vec<RecordId>)>,
    ) -> IndexResult<()> {
        let tree = self.tree_mut(table, column)?;
        for (value, ids) in remote {
            match tree.get_mut(&value) {
                Some(local) => {
                    for id in ids {
                        if !local.contains(&id) {
                            local.push(id);
                        }
                    }
                }
                None => tree.insert(value, ids),
            }
        }
        Ok(())
    }

    /// Statistics for the index on (table, column).
    pub fn stats(&self, table: &str, column: &str) -> IndexResult<IndexStats> {
        let tree = self.tree(table, column)?;
        let mut entries = 0;
        tree.for_each(|_, ids| entries += ids.len());
        Ok(IndexStats {
            entries,
            keys: tree.len(),
            height: tree.height(),
            nodes: tree.node_count(),
        })
    }
}
