//! Byte-level transforms applied to page payloads on the write-back path:
//! run-length compression and authenticated encryption.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

use super::error::{RecordError, RecordResult};

/// AES-GCM nonce length, prepended to the ciphertext
pub(crate) const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length, appended by the cipher
pub(crate) const TAG_LEN: usize = 16;

/// Run-length encode: pairs of (count, byte), count capped at 255.
pub fn rle_compress(data: &[u8]) -> Vec<u8> {
    let mut compressed = Vec::new();
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        let mut count = 1usize;
        while count < 255 && i + count < data.len() && data[i + count] == byte {
            count += 1;
        }
        compressed.push(count as u8);
        compressed.push(byte);
        i += count;
    }
    compressed
}

/// Reverse of [`rle_compress`].
pub fn rle_decompress(data: &[u8]) -> RecordResult<Vec<u8>> {
    if data.len() % 2 != 0 {
        return Err(RecordError::Corrupted(
            "run-length stream has odd length".to_string(),
        ));
    }

    let mut decompressed = Vec::new();
    for pair in data.chunks_exact(2) {
        let count = pair[0] as usize;
        if count == 0 {
            return Err(RecordError::Corrupted(
                "run-length stream has zero-length run".to_string(),
            ));
        }
        decompressed.extend(std::iter::repeat(pair[1]).take(count));
    }
    Ok(decompressed)
}

/// Encrypt with AES-256-GCM; the random nonce is prepended to the ciphertext.
pub(crate) fn aead_encrypt(key: &[u8; 32], plain: &[u8]) -> RecordResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain)
        .map_err(|_| RecordError::Crypto("encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Reverse of [`aead_encrypt`]; fails if the key is wrong or the data was tampered with.
pub(crate) fn aead_decrypt(key: &[u8; 32], sealed: &[u8]) -> RecordResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(RecordError::Crypto(
            "ciphertext shorter than nonce and tag".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &sealed[NONCE_LEN..])
        .map_err(|_| RecordError::Crypto("decryption failed: bad key or tampered data".to_string()))
}
