//! Records and the slotted pages that hold them.

pub(crate) mod codec;
mod error;
mod page;
pub mod schema;

pub use error::{RecordError, RecordResult};
pub use page::{Page, MIN_PAGE_SIZE, PAGE_HEADER_SIZE};
pub(crate) use page::ENCRYPTION_OVERHEAD;

/// Engine-level handle identifying a record within a table
pub type RecordId = u64;

const FIELD_PREFIX: usize = 4;

/// Serialize an ordered sequence of string fields into one page slot:
/// a `u32` field count followed by a `u32` length prefix and UTF-8 bytes
/// per field. Fields may contain any characters, newlines included.
pub fn encode_fields(fields: &[String]) -> Vec<u8> {
    let payload: usize = fields.iter().map(|f| FIELD_PREFIX + f.len()).sum();
    let mut bytes = Vec::with_capacity(FIELD_PREFIX + payload);
    bytes.extend_from_slice(&(fields.len() as u32).to_le_bytes());
    for field in fields {
        bytes.extend_from_slice(&(field.len() as u32).to_le_bytes());
        bytes.extend_from_slice(field.as_bytes());
    }
    bytes
}

/// Reverse of [`encode_fields`].
pub fn decode_fields(bytes: &[u8]) -> RecordResult<Vec<String>> {
    let mut pos = 0;
    let count = read_u32(bytes, &mut pos)? as usize;

    let mut fields = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let len = read_u32(bytes, &mut pos)? as usize;
        if pos + len > bytes.len() {
            return Err(RecordError::Corrupted(format!(
                "field length {} exceeds record payload",
                len
            )));
        }
        let field = std::str::from_utf8(&bytes[pos..pos + len])
            .map_err(|err| RecordError::Corrupted(format!("field is not UTF-8: {err}")))?;
        fields.push(field.to_string());
        pos += len;
    }

    if pos != bytes.len() {
        return Err(RecordError::Corrupted(format!(
            "{} trailing bytes after {} fields",
            bytes.len() - pos,
            count
        )));
    }
    Ok(fields)
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> RecordResult<u32> {
    if *pos + 4 > bytes.len() {
        return Err(RecordError::Corrupted(
            "record payload truncated".to_string(),
        ));
    }
    let value = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    Ok(value)
}
