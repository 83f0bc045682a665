//! Engine configuration.

/// Default page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default minimum degree of secondary-index B-trees
pub const DEFAULT_BTREE_DEGREE: usize = 10;

/// Buffer pool sizing configuration
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Explicit buffer capacity in bytes; 0 means auto-detect from system memory
    pub initial_size: usize,
    /// Fraction of physical memory to use when auto-detecting
    pub memory_usage_fraction: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            memory_usage_fraction: 0.25,
        }
    }
}

/// Top-level storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bytes per page
    pub page_size: usize,
    /// RLE-compress pages on the write-back path
    pub use_compression: bool,
    /// AEAD-encrypt pages on the write-back path
    pub use_encryption: bool,
    /// Key for page encryption; required when `use_encryption` is set
    pub encryption_key: Option<[u8; 32]>,
    /// Buffer pool sizing
    pub buffer: BufferConfig,
    /// Minimum degree of index B-trees
    pub btree_degree: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            use_compression: true,
            use_encryption: false,
            encryption_key: None,
            buffer: BufferConfig::default(),
            btree_degree: DEFAULT_BTREE_DEGREE,
        }
    }
}
