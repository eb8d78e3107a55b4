//! AES-256-GCM encryption for token records at rest.
//!
//! Every encryption draws a fresh random 96-bit nonce; nonces are stored
//! next to the ciphertext and must never be reused under the same key.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};

use crate::auth::error::AuthError;

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Nonce size in bytes (96 bits, standard for GCM).
pub const IV_SIZE: usize = 12;

/// Hex characters in an encoded key.
pub const HEX_KEY_LEN: usize = KEY_SIZE * 2;

/// Generate a fresh random 256-bit key.
///
/// Operator tooling uses this to mint the value stored in
/// `TOKEN_ENCRYPTION_KEY` (as 64 hex characters).
pub fn generate_key() -> [u8; KEY_SIZE] {
    Aes256Gcm::generate_key(&mut OsRng).into()
}

/// An encrypted payload as persisted to disk.
///
/// Serializes to a JSON object with two hex-string fields. The ciphertext
/// includes the GCM authentication tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    #[serde(with = "hex_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Authenticated encryption of byte payloads under a fixed 256-bit key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build a cipher from raw key bytes. The key must be exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, AuthError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AuthError::InvalidKeyLength {
            expected: KEY_SIZE,
            got: key.len(),
        })?;
        Ok(Self { cipher })
    }

    /// Build a cipher from a 64-character hex key, ignoring surrounding
    /// whitespace.
    pub fn from_hex(hex_key: &str) -> Result<Self, AuthError> {
        let trimmed = hex_key.trim();
        if trimmed.len() != HEX_KEY_LEN {
            return Err(AuthError::InvalidKeyFormat {
                expected: HEX_KEY_LEN,
                reason: format!("got {} characters", trimmed.len()),
            });
        }
        let key = hex::decode(trimmed).map_err(|err| AuthError::InvalidKeyFormat {
            expected: HEX_KEY_LEN,
            reason: err.to_string(),
        })?;
        Self::new(&key)
    }

    /// Encrypt a payload under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob, AuthError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| AuthError::EncryptionFailed)?;
        Ok(EncryptedBlob {
            iv: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Decrypt a payload, verifying the authentication tag.
    ///
    /// A wrong key, a corrupted nonce or ciphertext, and deliberate
    /// tampering all fail identically with [`AuthError::DecryptionFailed`].
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, AuthError> {
        if blob.iv.len() != IV_SIZE {
            return Err(AuthError::DecryptionFailed);
        }
        let nonce = Nonce::from_slice(&blob.iv);
        self.cipher
            .decrypt(nonce, blob.ciphertext.as_ref())
            .map_err(|_| AuthError::DecryptionFailed)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> TokenCipher {
        TokenCipher::new(&[7u8; KEY_SIZE]).unwrap()
    }

    #[test]
    fn round_trip_preserves_payload() {
        let cipher = cipher();
        for payload in [
            b"".to_vec(),
            b"{\"access_token\":\"ya29.x\"}".to_vec(),
            vec![0xA5; 70_000],
        ] {
            let blob = cipher.encrypt(&payload).unwrap();
            assert_eq!(cipher.decrypt(&blob).unwrap(), payload);
        }
    }

    #[test]
    fn repeated_encryption_uses_fresh_nonces() {
        let cipher = cipher();
        let first = cipher.encrypt(b"same-plaintext").unwrap();
        let second = cipher.encrypt(b"same-plaintext").unwrap();
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn any_flipped_bit_fails_decryption() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"secret token data").unwrap();
        for index in [0, blob.ciphertext.len() / 2, blob.ciphertext.len() - 1] {
            let mut tampered = blob.clone();
            tampered.ciphertext[index] ^= 0x01;
            assert!(matches!(
                cipher.decrypt(&tampered),
                Err(AuthError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn tampered_iv_fails_decryption() {
        let cipher = cipher();
        let mut blob = cipher.encrypt(b"secret").unwrap();
        blob.iv[0] ^= 0x01;
        assert!(matches!(
            cipher.decrypt(&blob),
            Err(AuthError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let blob = cipher().encrypt(b"secret").unwrap();
        let other = TokenCipher::new(&[8u8; KEY_SIZE]).unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(AuthError::DecryptionFailed)
        ));
    }

    #[test]
    fn truncated_iv_fails_decryption() {
        let cipher = cipher();
        let mut blob = cipher.encrypt(b"secret").unwrap();
        blob.iv.truncate(8);
        assert!(matches!(
            cipher.decrypt(&blob),
            Err(AuthError::DecryptionFailed)
        ));
    }

    #[test]
    fn raw_key_must_be_32_bytes() {
        for len in [0, 16, 31, 33, 64] {
            assert!(matches!(
                TokenCipher::new(&vec![0u8; len]),
                Err(AuthError::InvalidKeyLength { got, .. }) if got == len
            ));
        }
    }

    #[test]
    fn hex_key_accepts_64_hex_chars_in_either_case() {
        assert!(TokenCipher::from_hex(&"a".repeat(64)).is_ok());
        assert!(TokenCipher::from_hex(&"A".repeat(64)).is_ok());
        assert!(TokenCipher::from_hex(&format!("  {}\n", "0f".repeat(32))).is_ok());
    }

    #[test]
    fn hex_key_rejects_bad_length_and_non_hex() {
        assert!(matches!(
            TokenCipher::from_hex(&"a".repeat(63)),
            Err(AuthError::InvalidKeyFormat { .. })
        ));
        assert!(matches!(
            TokenCipher::from_hex(&"a".repeat(65)),
            Err(AuthError::InvalidKeyFormat { .. })
        ));
        assert!(matches!(
            TokenCipher::from_hex(&format!("{}g", "a".repeat(63))),
            Err(AuthError::InvalidKeyFormat { .. })
        ));
        assert!(matches!(
            TokenCipher::from_hex(""),
            Err(AuthError::InvalidKeyFormat { .. })
        ));
    }

    #[test]
    fn generated_keys_are_valid_and_distinct() {
        let first = generate_key();
        let second = generate_key();
        assert_ne!(first, second);
        assert!(TokenCipher::new(&first).is_ok());
        assert!(TokenCipher::from_hex(&hex::encode(first)).is_ok());
    }

    #[test]
    fn blob_serializes_to_hex_string_fields() {
        let blob = cipher().encrypt(b"payload").unwrap();
        let json = serde_json::to_value(&blob).unwrap();
        let iv = json["iv"].as_str().unwrap();
        assert_eq!(iv.len(), IV_SIZE * 2);
        assert!(iv.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(json["ciphertext"]
            .as_str()
            .unwrap()
            .chars()
            .all(|c| c.is_ascii_hexdigit()));

        let parsed: EncryptedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.iv, blob.iv);
        assert_eq!(parsed.ciphertext, blob.ciphertext);
    }

    #[test]
    fn blob_with_invalid_hex_fails_to_parse() {
        let result: Result<EncryptedBlob, _> =
            serde_json::from_str(r#"{"iv":"zz","ciphertext":"00"}"#);
        assert!(result.is_err());
    }
}
