use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};
use super::PageId;
use crate::record::Page;

/// Manages per-table heap files under a data directory.
///
/// Each file is a sequence of fixed-size pages; page `n` lives at byte
/// offset `n * page_size`. Files are keyed by name and opened lazily on
/// first use. Writes are synced to disk before returning.
pub struct FileManager {
    data_dir: PathBuf,
    page_size: usize,
    open_files: HashMap<String, File>,
}

impl FileManager {
    /// Create a file manager rooted at `data_dir`, creating the directory
    /// if needed.
    pub fn new<P: AsRef<Path>>(data_dir: P, page_size: usize) -> FileResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            page_size,
            open_files: HashMap::new(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Create a new empty file
    pub fn create_file(&mut self, name: &str) -> FileResult<()> {
        let path = self.file_path(name);
        if path.exists() {
            return Err(FileError::FileAlreadyExists(name.to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        self.open_files.insert(name.to_string(), file);
        Ok(())
    }

    /// Open an existing file; a no-op if it is already open
    pub fn open_file(&mut self, name: &str) -> FileResult<()> {
        if self.open_files.contains_key(name) {
            return Ok(());
        }

        let path = self.file_path(name);
        if !path.exists() {
            return Err(FileError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        self.open_files.insert(name.to_string(), file);
        Ok(())
    }

    /// Close a file if it is open
    pub fn close_file(&mut self, name: &str) {
        self.open_files.remove(name);
    }

    /// Close and delete a file
    pub fn remove_file(&mut self, name: &str) -> FileResult<()> {
        self.open_files.remove(name);
        let path = self.file_path(name);
        if !path.exists() {
            return Err(FileError::FileNotFound(name.to_string()));
        }
        std::fs::remove_file(&path)?;
        Ok(())
    }

    fn ensure_open(&mut self, name: &str) -> FileResult<&mut File> {
        self.open_file(name)?;
        Ok(self.open_files.get_mut(name).unwrap())
    }

    /// Number of pages currently in the file
    pub fn page_count(&mut self, name: &str) -> FileResult<u64> {
        let page_size = self.page_size as u64;
        let file = self.ensure_open(name)?;
        let len = file.metadata()?.len();
        Ok(len.div_ceil(page_size))
    }

    /// Read the full page image at `page_id * page_size`
    pub fn read_page(&mut self, name: &str, page_id: PageId) -> FileResult<Vec<u8>> {
        let page_size = self.page_size;
        let file = self.ensure_open(name)?;

        let len = file.metadata()?.len();
        let offset = page_id * page_size as u64;
        if offset >= len {
            return Err(FileError::PageOutOfBounds {
                file: name.to_string(),
                page_id,
                page_count: len / page_size as u64,
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut image = vec![0u8; page_size];
        let mut read = 0;
        while read < page_size {
            let n = file.read(&mut image[read..])?;
            if n == 0 {
                return Err(FileError::ShortRead {
                    file: name.to_string(),
                    page_id,
                    expected: page_size,
                    actual: read,
                });
            }
            read += n;
        }
        Ok(image)
    }

    /// Write a full page image at `page_id * page_size`, syncing to disk
    pub fn write_page(&mut self, name: &str, page_id: PageId, image: &[u8]) -> FileResult<()> {
        let page_size = self.page_size;
        if image.len() != page_size {
            return Err(FileError::InvalidPageSize {
                expected: page_size,
                actual: image.len(),
            });
        }

        let file = self.ensure_open(name)?;
        let offset = page_id * page_size as u64;
        let required = offset + page_size as u64;
        if file.metadata()?.len() < required {
            file.set_len(required)?;
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(image)?;
        file.sync_data()?;
        Ok(())
    }

    /// Append a blank page, stamped with the next page id
    pub fn allocate_page(&mut self, name: &str) -> FileResult<Page> {
        let page_id = {
            let page_size = self.page_size as u64;
            let file = self.ensure_open(name)?;
            file.metadata()?.len() / page_size
        };

        let page = Page::new(page_id, self.page_size);
        let image = page.serialize()?;
        self.write_page(name, page_id, &image)?;
        Ok(page)
    }

    /// Sync one file's OS buffers to disk
    pub fn sync_file(&mut self, name: &str) -> FileResult<()> {
        let file = self.ensure_open(name)?;
        file.sync_data()?;
        Ok(())
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for file in self.open_files.values_mut() {
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_file_open(&self, name: &str) -> bool {
        self.open_files.contains_key(name)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }
}
