use thiserror::Error;

use crate::btree::BTreeError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index already exists on {table}.{column}")]
    IndexExists { table: String, column: String },

    #[error("no index on {table}.{column}")]
    IndexMissing { table: String, column: String },

    #[error("column {column} not found in table {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("B-tree error: {0}")]
    BTree(#[from] BTreeError),
}

pub type IndexResult<T> = Result<T, IndexError>;
