use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};

// ============================================================================
// Field Encryption Codec
// ============================================================================
//
// Reversible encryption for a single sensitive column (customer email).
//
// Layout of an encrypted blob:
//   [ 16-byte IV ][ AES-CBC ciphertext, PKCS#7 padded ]
//
// The AES variant is picked from the key length (16/24/32 bytes). A fresh IV
// is drawn for every call, so equal plaintexts never produce equal blobs.
//
// ============================================================================

/// Length of the initialization vector prefixed to every blob
pub const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encryption key must be 16, 24 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Encrypted value is {0} bytes, shorter than the {IV_LEN}-byte IV")]
    TooShort(usize),

    #[error("Decryption failed: ciphertext or padding is malformed")]
    Decryption,

    #[error("Decrypted value is not valid UTF-8")]
    InvalidUtf8,
}

/// Encrypt `plaintext` under `key`, returning `IV || ciphertext`
pub fn encrypt(plaintext: &str, key: &str) -> Result<Vec<u8>, CodecError> {
    let key = key.as_bytes();
    let iv: [u8; IV_LEN] = rand::random();

    let ciphertext = match key.len() {
        16 => encrypt_with::<Aes128>(key, &iv, plaintext.as_bytes()),
        24 => encrypt_with::<Aes192>(key, &iv, plaintext.as_bytes()),
        32 => encrypt_with::<Aes256>(key, &iv, plaintext.as_bytes()),
        other => return Err(CodecError::InvalidKeyLength(other)),
    }?;

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Split the IV off `blob` and decrypt the remainder under `key`
pub fn decrypt(blob: &[u8], key: &str) -> Result<String, CodecError> {
    if blob.len() < IV_LEN {
        return Err(CodecError::TooShort(blob.len()));
    }

    let key = key.as_bytes();
    let (iv, ciphertext) = blob.split_at(IV_LEN);

    let plaintext = match key.len() {
        16 => decrypt_with::<Aes128>(key, iv, ciphertext),
        24 => decrypt_with::<Aes192>(key, iv, ciphertext),
        32 => decrypt_with::<Aes256>(key, iv, ciphertext),
        other => return Err(CodecError::InvalidKeyLength(other)),
    }?;

    String::from_utf8(plaintext).map_err(|_| CodecError::InvalidUtf8)
}

fn encrypt_with<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CodecError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_with<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CodecError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| CodecError::InvalidKeyLength(key.len()))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CodecError::Decryption)
}

// ============================================================================
// FieldCipher - validated key handed to components at startup
// ============================================================================

/// Process-wide encryption key, length-checked once at construction.
#[derive(Clone)]
pub struct FieldCipher {
    key: String,
}

impl FieldCipher {
    pub fn new(key: impl Into<String>) -> Result<Self, CodecError> {
        let key = key.into();
        match key.len() {
            16 | 24 | 32 => Ok(Self { key }),
            other => Err(CodecError::InvalidKeyLength(other)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CodecError> {
        encrypt(plaintext, &self.key)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String, CodecError> {
        decrypt(blob, &self.key)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher")
            .field("key", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
