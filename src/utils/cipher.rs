//! AES-256-GCM file encryption.
//!
//! Output layout is `[12-byte nonce][ciphertext + 16-byte tag]` with no header.
//! Files are processed entirely in memory, so the usable size is bounded by RAM.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use std::fs;
use std::path::Path;

use crate::errors::CryptoError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

fn new_cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_LEN,
        actual: key.len(),
    })
}

/// `len` bytes from the OS RNG, hex encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Parses a 64-character hex string into a key.
pub fn parse_hex_key(hex_key: &str) -> Result<[u8; KEY_LEN], CryptoError> {
    let bytes = hex::decode(hex_key)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })
}

pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = new_cipher(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt_bytes(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = new_cipher(key)?;
    if data.len() < NONCE_LEN {
        return Err(CryptoError::Truncated {
            len: data.len(),
            nonce_len: NONCE_LEN,
        });
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

/// Encrypts `input_path` into `output_path`. The key is checked before
/// anything is read or written.
pub fn encrypt_file(input_path: &Path, output_path: &Path, key: &[u8]) -> Result<(), CryptoError> {
    new_cipher(key)?;
    let plaintext = fs::read(input_path)?;
    let sealed = encrypt_bytes(&plaintext, key)?;
    fs::write(output_path, sealed)?;
    Ok(())
}

/// Decrypts `input_path` into `output_path`. Nothing is written unless the
/// authentication tag verifies.
pub fn decrypt_file(input_path: &Path, output_path: &Path, key: &[u8]) -> Result<(), CryptoError> {
    new_cipher(key)?;
    let data = fs::read(input_path)?;
    let plaintext = decrypt_bytes(&data, key)?;
    fs::write(output_path, plaintext)?;
    Ok(())
}
