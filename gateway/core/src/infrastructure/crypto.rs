// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Token blob encryption: AES-256-GCM over an scrypt-derived key.
//!
//! The key is derived once per process from the configured secret and
//! salt. Wire format is `base64(salt || iv || authTag || ciphertext)`; the
//! salt travels with the blob so material encrypted before a salt
//! rotation stays decryptable. Tampering or a wrong key fails decryption
//! outright rather than yielding corrupt plaintext.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::domain::error::GatewayError;

const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Process-wide token cipher.
pub struct TokenCipher {
    secret: String,
    salt: Vec<u8>,
    key: [u8; KEY_SIZE],
}

impl TokenCipher {
    /// Derive the key once from the configured secret and salt.
    pub fn new(secret: &str, salt: &str) -> Result<Self, GatewayError> {
        if secret.is_empty() || salt.is_empty() {
            return Err(GatewayError::InvalidArgument(
                "encryption secret and salt must be non-empty".to_string(),
            ));
        }
        let salt = salt.as_bytes().to_vec();
        let key = derive_key(secret, &salt)?;
        Ok(Self {
            secret: secret.to_string(),
            salt,
            key,
        })
    }

    /// Encrypt a plaintext blob into the base64 wire format.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, GatewayError> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| GatewayError::Internal(format!("cipher init failed: {}", e)))?;
        let sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| GatewayError::Internal(format!("encryption failed: {:?}", e)))?;
        // aes-gcm appends the tag to the ciphertext; the wire format wants
        // it between the iv and the ciphertext body.
        let (body, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut out = Vec::with_capacity(self.salt.len() + IV_SIZE + TAG_SIZE + body.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag);
        out.extend_from_slice(body);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a wire blob. A wrong key or tampered payload is an error,
    /// never silent corruption.
    pub fn decrypt(&self, blob: &str) -> Result<Vec<u8>, GatewayError> {
        let data = BASE64
            .decode(blob)
            .map_err(|e| GatewayError::InvalidArgument(format!("blob is not base64: {}", e)))?;
        let salt_len = self.salt.len();
        if data.len() < salt_len + IV_SIZE + TAG_SIZE {
            return Err(GatewayError::InvalidArgument(
                "encrypted blob too short".to_string(),
            ));
        }

        let salt = &data[..salt_len];
        let iv = &data[salt_len..salt_len + IV_SIZE];
        let tag = &data[salt_len + IV_SIZE..salt_len + IV_SIZE + TAG_SIZE];
        let body = &data[salt_len + IV_SIZE + TAG_SIZE..];

        // Blobs written before a salt rotation re-derive with their own salt.
        let key = if salt == self.salt.as_slice() {
            self.key
        } else {
            derive_key(&self.secret, salt)?
        };

        let mut sealed = Vec::with_capacity(body.len() + TAG_SIZE);
        sealed.extend_from_slice(body);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| GatewayError::Internal(format!("cipher init failed: {}", e)))?;
        cipher
            .decrypt(Nonce::from_slice(iv), sealed.as_ref())
            .map_err(|_| {
                GatewayError::Unauthenticated(
                    "token blob failed authentication (wrong key or tampered data)".to_string(),
                )
            })
    }
}

fn derive_key(secret: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE], GatewayError> {
    let params = scrypt::Params::new(15, 8, 1, KEY_SIZE)
        .map_err(|e| GatewayError::Internal(format!("bad scrypt params: {}", e)))?;
    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(secret.as_bytes(), salt, &params, &mut key)
        .map_err(|e| GatewayError::Internal(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new("unit-test-secret", "unit-test-salt").unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = cipher();
        let plaintext = br#"{"accessToken":"tok-1","refreshToken":"ref-1"}"#;
        let blob = cipher.encrypt(plaintext).unwrap();
        let decrypted = cipher.decrypt(&blob).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn same_plaintext_yields_distinct_blobs() {
        let cipher = cipher();
        let a = cipher.encrypt(b"secret").unwrap();
        let b = cipher.encrypt(b"secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let blob = cipher().encrypt(b"secret").unwrap();
        // Same salt, different secret: same wire salt but a different key.
        let other = TokenCipher::new("other-secret", "unit-test-salt").unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(GatewayError::Unauthenticated(_))
        ));
    }

    #[test]
    fn tampered_blob_fails_authentication() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"secret").unwrap();
        let mut raw = BASE64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = BASE64.encode(raw);
        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn blob_survives_salt_rotation() {
        let old = TokenCipher::new("shared-secret", "old-salt").unwrap();
        let blob = old.encrypt(b"keep me").unwrap();

        let rotated = TokenCipher::new("shared-secret", "new-salt").unwrap();
        assert_eq!(rotated.decrypt(&blob).unwrap(), b"keep me");
    }

    #[test]
    fn truncated_blob_rejected() {
        let cipher = cipher();
        assert!(cipher.decrypt("c2hvcnQ=").is_err());
    }
}
