use thiserror::Error;

#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("invalid B-tree degree {0}: minimum degree must be at least 2")]
    InvalidDegree(usize),

    #[error("bulk load input is not sorted: key at position {0} is out of order")]
    UnsortedInput(usize),
}

pub type BTreeResult<T> = Result<T, BTreeError>;
