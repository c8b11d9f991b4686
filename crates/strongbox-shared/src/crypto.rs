//! Client-side encryption envelope for sensitive record types.
//!
//! The server never sees the key; it stores whatever bytes the client sends.
//! Text-typed records carry the envelope base64-encoded so that the stored
//! value stays valid UTF-8.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{NONCE_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; SYMMETRIC_KEY_SIZE];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Parse a 64-character hex string into a key.
pub fn parse_key_hex(hex_key: &str) -> Result<SymmetricKey, CryptoError> {
    let bytes = hex::decode(hex_key.trim())?;
    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(bytes.len()));
    }
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt a text value into a base64 envelope.
pub fn seal_text(key: &SymmetricKey, plaintext: &str) -> Result<String, CryptoError> {
    let sealed = encrypt(key, plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

/// Inverse of [`seal_text`]. Fails on a wrong key, a tampered envelope, or
/// anything that is not an envelope at all.
pub fn open_text(key: &SymmetricKey, envelope: &str) -> Result<String, CryptoError> {
    let sealed = STANDARD
        .decode(envelope.trim())
        .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
    let plaintext = decrypt(key, &sealed)?;
    String::from_utf8(plaintext).map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"4111 1111 1111 1111";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_symmetric_key();
        let key2 = generate_symmetric_key();

        let encrypted = encrypt(&key1, b"Secret message").unwrap();
        assert!(decrypt(&key2, &encrypted).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_symmetric_key();

        let mut encrypted = encrypt(&key, b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn test_every_tampered_byte_is_detected() {
        let key = generate_symmetric_key();
        let encrypted = encrypt(&key, b"pw123").unwrap();

        for i in 0..encrypted.len() {
            let mut copy = encrypted.clone();
            copy[i] ^= 0x01;
            assert!(decrypt(&key, &copy).is_err(), "byte {i} flip went unnoticed");
        }
    }

    #[test]
    fn test_empty_data_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, &[]).is_err());
    }

    #[test]
    fn test_nonce_prepended() {
        let key = generate_symmetric_key();
        let encrypted = encrypt(&key, b"test").unwrap();
        // nonce (24) + ciphertext (4 + 16 tag)
        assert_eq!(encrypted.len(), NONCE_SIZE + 4 + TAG_SIZE);
    }

    #[test]
    fn test_text_envelope_roundtrip() {
        let key = generate_symmetric_key();
        let envelope = seal_text(&key, "alice:pw123").unwrap();

        assert_ne!(envelope, "alice:pw123");
        assert_eq!(open_text(&key, &envelope).unwrap(), "alice:pw123");
    }

    #[test]
    fn test_text_envelope_wrong_key() {
        let envelope = seal_text(&generate_symmetric_key(), "hunter2").unwrap();
        let err = open_text(&generate_symmetric_key(), &envelope).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_plain_text_is_not_an_envelope() {
        let key = generate_symmetric_key();
        let err = open_text(&key, "just some notes").unwrap_err();
        assert!(matches!(err, CryptoError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_parse_key_hex() {
        let key = parse_key_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(key, [0xab; 32]);
        assert!(matches!(
            parse_key_hex("abcd"),
            Err(CryptoError::InvalidKeyLength(2))
        ));
        assert!(parse_key_hex(&"zz".repeat(32)).is_err());
    }
}
