use sha2::{Digest, Sha256};

use super::codec::{aead_decrypt, aead_encrypt, rle_compress, rle_decompress, NONCE_LEN, TAG_LEN};
use super::error::{RecordError, RecordResult};

/// On-disk page header size
pub const PAGE_HEADER_SIZE: usize = 24;

/// Payload bytes reserved so an encrypted image still fits the fixed envelope
pub(crate) const ENCRYPTION_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Smallest supported page size
pub const MIN_PAGE_SIZE: usize = 128;

const SLOT_ENTRY_SIZE: usize = 2;
const SLOT_FREE: u16 = u16::MAX;
const RECORD_PREFIX: usize = 8;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_ENCRYPTED: u8 = 0b0000_0010;

/// A fixed-size slotted page.
///
/// Records are written forward from offset 0 as `[u64 LE length][payload]`
/// slots; a directory of `u16` byte offsets grows backward from the payload
/// tail, one entry per logical slot. Slot numbers are stable: deletes and
/// shrinking updates compact the record area immediately without renumbering
/// surviving slots, so a slot id handed out by [`Page::add_record`] stays
/// valid until the record is deleted.
///
/// The record area is kept contiguous, so a zero length word terminates the
/// live records when scanning the raw bytes.
#[derive(Debug, Clone)]
pub struct Page {
    page_id: u64,
    page_size: usize,
    data: Vec<u8>,
    slot_count: usize,
    free_space: usize,
    compressed: bool,
    encrypted: bool,
    checksum: u32,
}

impl Page {
    /// Create a new empty page.
    pub fn new(page_id: u64, page_size: usize) -> Self {
        debug_assert!(page_size >= MIN_PAGE_SIZE);
        let capacity = Self::capacity_for(page_size);
        let mut page = Self {
            page_id,
            page_size,
            data: vec![0u8; capacity],
            slot_count: 0,
            free_space: capacity,
            compressed: false,
            encrypted: false,
            checksum: 0,
        };
        page.update_checksum();
        page
    }

    /// Payload capacity for a given page size.
    pub fn capacity_for(page_size: usize) -> usize {
        page_size.saturating_sub(PAGE_HEADER_SIZE + ENCRYPTION_OVERHEAD)
    }

    /// Largest record that fits an empty page of the given size.
    pub fn max_record_len(page_size: usize) -> usize {
        Self::capacity_for(page_size).saturating_sub(RECORD_PREFIX + SLOT_ENTRY_SIZE)
    }

    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Free bytes available for new records and directory growth.
    pub fn free_space(&self) -> usize {
        self.free_space
    }

    /// Number of directory entries, including freed ones.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub(crate) fn data_len(&self) -> usize {
        self.data.len()
    }

    fn capacity(&self) -> usize {
        Self::capacity_for(self.page_size)
    }

    fn ensure_plain(&self) -> RecordResult<()> {
        if self.compressed || self.encrypted {
            return Err(RecordError::PageSealed);
        }
        Ok(())
    }

    /// First byte past the live record area.
    fn write_cursor(&self) -> usize {
        self.capacity() - self.free_space - self.slot_count * SLOT_ENTRY_SIZE
    }

    fn slot_offset(&self, slot: usize) -> u16 {
        let cap = self.capacity();
        let at = cap - (slot + 1) * SLOT_ENTRY_SIZE;
        u16::from_le_bytes([self.data[at], self.data[at + 1]])
    }

    fn set_slot_offset(&mut self, slot: usize, offset: u16) {
        let cap = self.capacity();
        Self::put_slot_offset(&mut self.data, cap, slot, offset);
    }

    fn put_slot_offset(data: &mut [u8], capacity: usize, slot: usize, offset: u16) {
        let at = capacity - (slot + 1) * SLOT_ENTRY_SIZE;
        data[at..at + SLOT_ENTRY_SIZE].copy_from_slice(&offset.to_le_bytes());
    }

    /// Whether `slot` currently holds a record.
    pub fn is_slot_live(&self, slot: usize) -> bool {
        !self.compressed
            && !self.encrypted
            && slot < self.slot_count
            && self.slot_offset(slot) != SLOT_FREE
    }

    fn invalid_slot(&self, slot: usize) -> RecordError {
        RecordError::InvalidSlot {
            page_id: self.page_id,
            slot,
        }
    }

    /// Byte range of a live slot's payload: (payload_start, payload_len).
    fn slot_bounds(&self, slot: usize) -> RecordResult<(usize, usize)> {
        if slot >= self.slot_count {
            return Err(self.invalid_slot(slot));
        }
        let offset = self.slot_offset(slot);
        if offset == SLOT_FREE {
            return Err(self.invalid_slot(slot));
        }

        let offset = offset as usize;
        let dir_bottom = self.capacity() - self.slot_count * SLOT_ENTRY_SIZE;
        if offset + RECORD_PREFIX > dir_bottom {
            return Err(RecordError::Corrupted(format!(
                "slot {} offset {} overlaps directory on page {}",
                slot, offset, self.page_id
            )));
        }

        let len = u64::from_le_bytes(
            self.data[offset..offset + RECORD_PREFIX]
                .try_into()
                .unwrap(),
        ) as usize;
        if offset + RECORD_PREFIX + len > dir_bottom {
            return Err(RecordError::Corrupted(format!(
                "slot {} length {} out of bounds on page {}",
                slot, len, self.page_id
            )));
        }

        Ok((offset + RECORD_PREFIX, len))
    }

    /// Add a record, returning its slot id. Freed directory entries are
    /// reused before the directory grows.
    pub fn add_record(&mut self, record: &[u8]) -> RecordResult<usize> {
        self.ensure_plain()?;

        let needed = RECORD_PREFIX + record.len();
        let reuse = (0..self.slot_count).find(|&s| self.slot_offset(s) == SLOT_FREE);
        let dir_growth = if reuse.is_some() { 0 } else { SLOT_ENTRY_SIZE };

        if needed + dir_growth > self.free_space {
            return Err(RecordError::PageFull {
                needed: needed + dir_growth,
                free: self.free_space,
            });
        }

        let cursor = self.write_cursor();
        self.data[cursor..cursor + RECORD_PREFIX]
            .copy_from_slice(&(record.len() as u64).to_le_bytes());
        self.data[cursor + RECORD_PREFIX..cursor + needed].copy_from_slice(record);

        let slot = match reuse {
            Some(slot) => slot,
            None => {
                self.slot_count += 1;
                self.free_space -= SLOT_ENTRY_SIZE;
                self.slot_count - 1
            }
        };
        self.set_slot_offset(slot, cursor as u16);
        self.free_space -= needed;

        self.update_checksum();
        Ok(slot)
    }

    /// Read the record stored in `slot`.
    pub fn get_record(&self, slot: usize) -> RecordResult<&[u8]> {
        self.ensure_plain()?;
        let (start, len) = self.slot_bounds(slot)?;
        Ok(&self.data[start..start + len])
    }

    /// Overwrite the record in `slot`. Succeeds only when the new payload is
    /// no longer than the old one; otherwise the caller must delete and
    /// re-insert.
    pub fn update_record(&mut self, slot: usize, record: &[u8]) -> RecordResult<()> {
        self.ensure_plain()?;
        let (start, old_len) = self.slot_bounds(slot)?;

        if record.len() > old_len {
            return Err(RecordError::PageFull {
                needed: record.len(),
                free: old_len,
            });
        }

        let prefix = start - RECORD_PREFIX;
        self.data[prefix..start].copy_from_slice(&(record.len() as u64).to_le_bytes());
        self.data[start..start + record.len()].copy_from_slice(record);

        if record.len() < old_len {
            self.free_space += old_len - record.len();
            self.compact_area();
        }

        self.update_checksum();
        Ok(())
    }

    /// Delete the record in `slot`. The slot id is retired until reused by a
    /// later insert; surviving slot ids are unchanged.
    pub fn delete_record(&mut self, slot: usize) -> RecordResult<()> {
        self.ensure_plain()?;
        let (_, len) = self.slot_bounds(slot)?;

        self.set_slot_offset(slot, SLOT_FREE);
        self.free_space += RECORD_PREFIX + len;
        self.compact_area();

        self.update_checksum();
        Ok(())
    }

    /// Rewrite live records contiguously from offset 0.
    pub fn compact(&mut self) -> RecordResult<()> {
        self.ensure_plain()?;
        self.compact_area();
        self.update_checksum();
        Ok(())
    }

    fn compact_area(&mut self) {
        let cap = self.capacity();
        let dir_bottom = cap - self.slot_count * SLOT_ENTRY_SIZE;

        let mut live: Vec<(usize, usize, usize)> = Vec::new();
        for slot in 0..self.slot_count {
            let offset = self.slot_offset(slot);
            if offset == SLOT_FREE {
                continue;
            }
            let offset = offset as usize;
            let len = u64::from_le_bytes(
                self.data[offset..offset + RECORD_PREFIX]
                    .try_into()
                    .unwrap(),
            ) as usize;
            live.push((slot, offset, RECORD_PREFIX + len));
        }
        live.sort_by_key(|&(_, offset, _)| offset);

        let mut new_data = vec![0u8; cap];
        new_data[dir_bottom..].copy_from_slice(&self.data[dir_bottom..]);

        let mut cursor = 0;
        for (slot, offset, total) in live {
            new_data[cursor..cursor + total].copy_from_slice(&self.data[offset..offset + total]);
            Self::put_slot_offset(&mut new_data, cap, slot, cursor as u16);
            cursor += total;
        }

        self.data = new_data;
    }

    /// Write a record into a specific slot, growing the directory as needed.
    /// Used by recovery to replay physical images at their logged slots.
    pub(crate) fn write_slot(&mut self, slot: usize, record: &[u8]) -> RecordResult<()> {
        self.ensure_plain()?;

        while self.slot_count <= slot {
            if self.free_space < SLOT_ENTRY_SIZE {
                return Err(RecordError::PageFull {
                    needed: SLOT_ENTRY_SIZE,
                    free: self.free_space,
                });
            }
            self.slot_count += 1;
            self.free_space -= SLOT_ENTRY_SIZE;
            let new_slot = self.slot_count - 1;
            self.set_slot_offset(new_slot, SLOT_FREE);
        }

        if self.slot_offset(slot) != SLOT_FREE {
            let (_, old_len) = self.slot_bounds(slot)?;
            if record.len() <= old_len {
                return self.update_record(slot, record);
            }
            self.set_slot_offset(slot, SLOT_FREE);
            self.free_space += RECORD_PREFIX + old_len;
            self.compact_area();
        }

        let needed = RECORD_PREFIX + record.len();
        if needed > self.free_space {
            return Err(RecordError::PageFull {
                needed,
                free: self.free_space,
            });
        }

        let cursor = self.write_cursor();
        self.data[cursor..cursor + RECORD_PREFIX]
            .copy_from_slice(&(record.len() as u64).to_le_bytes());
        self.data[cursor + RECORD_PREFIX..cursor + needed].copy_from_slice(record);
        self.set_slot_offset(slot, cursor as u16);
        self.free_space -= needed;

        self.update_checksum();
        Ok(())
    }

    /// Clear a slot if it holds a record; a no-op otherwise.
    pub(crate) fn clear_slot(&mut self, slot: usize) -> RecordResult<()> {
        self.ensure_plain()?;
        if slot >= self.slot_count || self.slot_offset(slot) == SLOT_FREE {
            return Ok(());
        }
        self.delete_record(slot)
    }

    /// Run-length compress the payload. A no-op if already compressed;
    /// compression must precede encryption.
    pub fn compress(&mut self) -> RecordResult<()> {
        if self.encrypted {
            return Err(RecordError::CompressAfterEncrypt);
        }
        if self.compressed {
            return Ok(());
        }
        self.data = rle_compress(&self.data);
        self.compressed = true;
        self.update_checksum();
        Ok(())
    }

    /// Reverse of [`Page::compress`]. A no-op if not compressed.
    pub fn decompress(&mut self) -> RecordResult<()> {
        if !self.compressed {
            return Ok(());
        }
        let plain = rle_decompress(&self.data)?;
        if plain.len() != self.capacity() {
            return Err(RecordError::Corrupted(format!(
                "decompressed payload is {} bytes, expected {}",
                plain.len(),
                self.capacity()
            )));
        }
        self.data = plain;
        self.compressed = false;
        self.update_checksum();
        Ok(())
    }

    /// Encrypt the payload with AES-256-GCM; a random nonce is prepended to
    /// the ciphertext. A no-op if already encrypted.
    pub fn encrypt(&mut self, key: &[u8; 32]) -> RecordResult<()> {
        if self.encrypted {
            return Ok(());
        }
        self.data = aead_encrypt(key, &self.data)?;
        self.encrypted = true;
        self.update_checksum();
        Ok(())
    }

    /// Reverse of [`Page::encrypt`]. A no-op if not encrypted.
    pub fn decrypt(&mut self, key: &[u8; 32]) -> RecordResult<()> {
        if !self.encrypted {
            return Ok(());
        }
        let plain = aead_decrypt(key, &self.data)?;
        if !self.compressed && plain.len() != self.capacity() {
            return Err(RecordError::Corrupted(format!(
                "decrypted payload is {} bytes, expected {}",
                plain.len(),
                self.capacity()
            )));
        }
        self.data = plain;
        self.encrypted = false;
        self.update_checksum();
        Ok(())
    }

    fn calculate_checksum(&self) -> u32 {
        let digest = Sha256::digest(&self.data);
        u32::from_le_bytes(digest[..4].try_into().unwrap())
    }

    fn update_checksum(&mut self) {
        self.checksum = self.calculate_checksum();
    }

    /// Whether the stored checksum matches the payload.
    pub fn verify_checksum(&self) -> bool {
        self.calculate_checksum() == self.checksum
    }

    /// Produce the fixed-size on-disk image: header, payload, zero padding.
    pub fn serialize(&self) -> RecordResult<Vec<u8>> {
        if self.data.len() > self.page_size - PAGE_HEADER_SIZE {
            return Err(RecordError::Oversize {
                page_size: self.page_size,
            });
        }

        let mut flags = 0u8;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }

        let mut image = vec![0u8; self.page_size];
        image[0..8].copy_from_slice(&self.page_id.to_le_bytes());
        image[8..12].copy_from_slice(&(self.data.len() as u32).to_le_bytes());
        image[12..14].copy_from_slice(&(self.slot_count as u16).to_le_bytes());
        image[14] = flags;
        image[16..20].copy_from_slice(&(self.free_space as u32).to_le_bytes());
        image[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        image[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + self.data.len()].copy_from_slice(&self.data);
        Ok(image)
    }

    /// Parse a full page image, verifying the stored checksum against the
    /// payload as stored.
    pub fn deserialize(image: &[u8]) -> RecordResult<Self> {
        if image.len() < MIN_PAGE_SIZE {
            return Err(RecordError::Deserialization(format!(
                "page image is {} bytes, minimum is {}",
                image.len(),
                MIN_PAGE_SIZE
            )));
        }

        let page_id = u64::from_le_bytes(image[0..8].try_into().unwrap());
        let payload_len = u32::from_le_bytes(image[8..12].try_into().unwrap()) as usize;
        let slot_count = u16::from_le_bytes(image[12..14].try_into().unwrap()) as usize;
        let flags = image[14];
        let free_space = u32::from_le_bytes(image[16..20].try_into().unwrap()) as usize;
        let stored = u32::from_le_bytes(image[20..24].try_into().unwrap());

        if PAGE_HEADER_SIZE + payload_len > image.len() {
            return Err(RecordError::Deserialization(format!(
                "payload length {} exceeds page image",
                payload_len
            )));
        }

        let data = image[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload_len].to_vec();
        let page = Self {
            page_id,
            page_size: image.len(),
            data,
            slot_count,
            free_space,
            compressed: flags & FLAG_COMPRESSED != 0,
            encrypted: flags & FLAG_ENCRYPTED != 0,
            checksum: stored,
        };

        let computed = page.calculate_checksum();
        if computed != stored {
            return Err(RecordError::ChecksumMismatch {
                page_id,
                stored,
                computed,
            });
        }

        if !page.compressed && !page.encrypted {
            let capacity = page.capacity();
            if page.data.len() != capacity
                || page.free_space + page.slot_count * SLOT_ENTRY_SIZE > capacity
            {
                return Err(RecordError::Corrupted(format!(
                    "inconsistent layout on page {}",
                    page_id
                )));
            }
        }

        Ok(page)
    }
}
