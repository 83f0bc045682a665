use std::num::NonZeroUsize;

use lru::LruCache;
use sysinfo::System;
use tracing::{debug, warn};

use super::error::{FileError, FileResult};
use super::file_manager::FileManager;
use super::PageId;
use crate::config::BufferConfig;
use crate::record::{Page, RecordError, ENCRYPTION_OVERHEAD, PAGE_HEADER_SIZE};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    file: String,
    page_id: PageId,
}

/// Entry in the buffer pool
struct Frame {
    page: Page,
    dirty: bool,
}

/// Transforms applied between cached pages and their on-disk images.
///
/// Compression and encryption run only on the write-back path so cached
/// pages stay mutable; reads reverse the transforms recorded in the page
/// header flags.
#[derive(Debug, Clone)]
pub struct PageCodec {
    pub compression: bool,
    pub encryption_key: Option<[u8; 32]>,
}

impl PageCodec {
    pub fn new(compression: bool, encryption_key: Option<[u8; 32]>) -> Self {
        Self {
            compression,
            encryption_key,
        }
    }

    fn encode(&self, page: &Page) -> FileResult<Vec<u8>> {
        let mut image = page.clone();

        if self.compression {
            image.compress()?;
            let overhead = if self.encryption_key.is_some() {
                ENCRYPTION_OVERHEAD
            } else {
                0
            };
            // RLE can expand; fall back to the raw payload when the
            // compressed image would not fit the envelope
            if image.data_len() + overhead > page.page_size() - PAGE_HEADER_SIZE {
                image = page.clone();
            }
        }

        if let Some(key) = &self.encryption_key {
            image.encrypt(key)?;
        }

        Ok(image.serialize()?)
    }

    fn decode(&self, image: &[u8]) -> FileResult<Page> {
        let mut page = Page::deserialize(image)?;

        if page.is_encrypted() {
            let key = self
                .encryption_key
                .as_ref()
                .ok_or(FileError::MissingEncryptionKey)?;
            page.decrypt(key)?;
        }
        if page.is_compressed() {
            page.decompress()?;
        }

        Ok(page)
    }
}

/// LRU cache of pages keyed by (file, page id), with dirty tracking and
/// synchronous write-back on eviction, invalidation and flush.
pub struct BufferManager {
    file_manager: FileManager,
    cache: LruCache<PageKey, Frame>,
    capacity_pages: usize,
    page_size: usize,
    codec: PageCodec,
}

impl BufferManager {
    /// Create a buffer manager over `file_manager`, sized from `config`:
    /// an explicit byte budget, or a fraction of physical memory when the
    /// budget is zero.
    pub fn new(file_manager: FileManager, config: &BufferConfig, codec: PageCodec) -> Self {
        let page_size = file_manager.page_size();
        let capacity_pages = Self::capacity_for(config, page_size);
        debug!(capacity_pages, page_size, "buffer pool sized");

        Self {
            file_manager,
            cache: LruCache::new(NonZeroUsize::new(capacity_pages).unwrap()),
            capacity_pages,
            page_size,
            codec,
        }
    }

    fn capacity_for(config: &BufferConfig, page_size: usize) -> usize {
        let bytes = if config.initial_size > 0 {
            config.initial_size
        } else {
            let mut sys = System::new();
            sys.refresh_memory();
            (sys.total_memory() as f64 * config.memory_usage_fraction) as usize
        };
        (bytes / page_size).max(1)
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut FileManager {
        &mut self.file_manager
    }

    pub fn codec(&self) -> &PageCodec {
        &self.codec
    }

    /// Swap the write-back codec. Already-cached pages are unaffected until
    /// their next write-back.
    pub fn set_codec(&mut self, codec: PageCodec) {
        self.codec = codec;
    }

    /// Get a page, loading it from disk on a miss.
    ///
    /// The borrow is tied to the buffer manager, so a caller cannot retain
    /// the page past its critical section.
    pub fn get_page(&mut self, file: &str, page_id: PageId) -> FileResult<&Page> {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };

        if self.cache.peek(&key).is_none() {
            self.load_page(key.clone())?;
        }
        Ok(&self.cache.get(&key).unwrap().page)
    }

    /// Get a mutable page reference, marking it dirty.
    pub fn get_page_mut(&mut self, file: &str, page_id: PageId) -> FileResult<&mut Page> {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };

        if self.cache.peek(&key).is_none() {
            self.load_page(key.clone())?;
        }
        let frame = self.cache.get_mut(&key).unwrap();
        frame.dirty = true;
        Ok(&mut frame.page)
    }

    /// Mark a cached page as dirty
    pub fn mark_dirty(&mut self, file: &str, page_id: PageId) -> FileResult<()> {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };
        let frame = self
            .cache
            .get_mut(&key)
            .ok_or_else(|| FileError::PageNotCached {
                file: file.to_string(),
                page_id,
            })?;
        frame.dirty = true;
        Ok(())
    }

    /// Allocate a fresh page in `file` and admit it to the cache.
    pub fn allocate_page(&mut self, file: &str) -> FileResult<PageId> {
        let page = self.file_manager.allocate_page(file)?;
        let page_id = page.page_id();

        while self.cache.len() >= self.capacity_pages {
            self.evict_lru()?;
        }
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };
        self.cache.put(key, Frame { page, dirty: false });
        Ok(page_id)
    }

    /// Write a page back to disk if it is dirty
    pub fn flush_page(&mut self, file: &str, page_id: PageId) -> FileResult<()> {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };

        if let Some(frame) = self.cache.peek_mut(&key) {
            if frame.dirty {
                let image = self.codec.encode(&frame.page)?;
                self.file_manager.write_page(&key.file, key.page_id, &image)?;
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Write all dirty pages back to disk
    pub fn flush_all_pages(&mut self) -> FileResult<()> {
        let dirty: Vec<PageKey> = self
            .cache
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(key, _)| key.clone())
            .collect();

        for key in dirty {
            if let Some(frame) = self.cache.peek_mut(&key) {
                if frame.dirty {
                    let image = self.codec.encode(&frame.page)?;
                    self.file_manager.write_page(&key.file, key.page_id, &image)?;
                    frame.dirty = false;
                }
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Drop a page from the cache, writing it back first if dirty
    pub fn invalidate_page(&mut self, file: &str, page_id: PageId) -> FileResult<()> {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };

        if let Some(frame) = self.cache.pop(&key) {
            if frame.dirty {
                let image = self.codec.encode(&frame.page)?;
                self.file_manager.write_page(file, page_id, &image)?;
            }
        }
        Ok(())
    }

    /// Discard every cached page of `file` without write-back. Used when the
    /// backing file is being removed.
    pub fn invalidate_file(&mut self, file: &str) {
        let stale: Vec<PageKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            self.cache.pop(&key);
        }
    }

    /// Warm the cache with the given pages. Pages past the end of the file
    /// are skipped.
    pub fn prefetch_pages(&mut self, file: &str, page_ids: &[PageId]) -> FileResult<()> {
        for &page_id in page_ids {
            let key = PageKey {
                file: file.to_string(),
                page_id,
            };
            if self.cache.contains(&key) {
                continue;
            }
            match self.load_page(key) {
                Ok(()) => {}
                Err(FileError::PageOutOfBounds { .. }) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Change the buffer budget, evicting pages (with write-back) if the
    /// cache must shrink.
    pub fn resize_buffer(&mut self, new_size_bytes: usize) -> FileResult<()> {
        let capacity = new_size_bytes / self.page_size;
        if capacity == 0 {
            return Err(FileError::InvalidBufferSize);
        }

        while self.cache.len() > capacity {
            self.evict_lru()?;
        }
        self.cache.resize(NonZeroUsize::new(capacity).unwrap());
        self.capacity_pages = capacity;
        debug!(capacity_pages = capacity, "buffer pool resized");
        Ok(())
    }

    /// Bytes currently held by cached pages
    pub fn buffer_size(&self) -> usize {
        self.cache.len() * self.page_size
    }

    pub fn capacity_pages(&self) -> usize {
        self.capacity_pages
    }

    pub fn cached_page_count(&self) -> usize {
        self.cache.len()
    }

    pub fn dirty_page_count(&self) -> usize {
        self.cache.iter().filter(|(_, frame)| frame.dirty).count()
    }

    pub fn is_page_cached(&self, file: &str, page_id: PageId) -> bool {
        let key = PageKey {
            file: file.to_string(),
            page_id,
        };
        self.cache.contains(&key)
    }

    fn load_page(&mut self, key: PageKey) -> FileResult<()> {
        while self.cache.len() >= self.capacity_pages {
            self.evict_lru()?;
        }

        let image = self.file_manager.read_page(&key.file, key.page_id)?;
        let page = self.codec.decode(&image)?;
        if page.page_id() != key.page_id {
            return Err(FileError::Record(RecordError::Corrupted(format!(
                "page {} of {} carries id {}",
                key.page_id,
                key.file,
                page.page_id()
            ))));
        }

        self.cache.put(key, Frame { page, dirty: false });
        Ok(())
    }

    fn evict_lru(&mut self) -> FileResult<()> {
        if let Some((key, frame)) = self.cache.pop_lru() {
            if frame.dirty {
                let image = self.codec.encode(&frame.page)?;
                self.file_manager.write_page(&key.file, key.page_id, &image)?;
                debug!(file = %key.file, page_id = key.page_id, "evicted dirty page");
            }
        }
        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_all_pages() {
            warn!(%err, "failed to flush buffer pool on drop");
        }
    }
}
