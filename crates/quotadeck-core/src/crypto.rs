//! At-rest encryption for the credential store.
//!
//! - PBKDF2-HMAC-SHA256, 100,000 iterations, 256-bit key
//! - AES-256-GCM with a 96-bit IV and 128-bit authentication tag
//! - Fresh random salt and IV on every encryption
//!
//! Blobs serialize as `salt:iv:tag:ciphertext`, each segment hex encoded.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const KDF_ITERATIONS: u32 = 100_000;
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const SEGMENT_SEPARATOR: char = ':';

/// Parsed form of an encrypted payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub salt: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Parse the delimited hex form. Never returns a partially parsed blob.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<&str> = raw.trim().split(SEGMENT_SEPARATOR).collect();
        if segments.len() != 4 {
            return Err(Error::MalformedBlob(format!(
                "expected 4 segments, found {}",
                segments.len()
            )));
        }

        let decode = |name: &str, segment: &str| {
            hex::decode(segment)
                .map_err(|e| Error::MalformedBlob(format!("invalid {} segment: {}", name, e)))
        };

        let salt = decode("salt", segments[0])?;
        if salt.is_empty() {
            return Err(Error::MalformedBlob("empty salt".to_string()));
        }

        let iv: [u8; IV_LEN] = decode("iv", segments[1])?
            .try_into()
            .map_err(|_| Error::MalformedBlob(format!("iv must be {} bytes", IV_LEN)))?;

        let auth_tag: [u8; TAG_LEN] = decode("tag", segments[2])?
            .try_into()
            .map_err(|_| Error::MalformedBlob(format!("tag must be {} bytes", TAG_LEN)))?;

        let ciphertext = decode("ciphertext", segments[3])?;

        Ok(Self {
            salt,
            iv,
            auth_tag,
            ciphertext,
        })
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}",
            hex::encode(&self.salt),
            hex::encode(self.iv),
            hex::encode(self.auth_tag),
            hex::encode(&self.ciphertext),
            sep = SEGMENT_SEPARATOR
        )
    }
}

/// Password-keyed authenticated encryption
///
/// The iteration count is not stored in the blob, so every cipher that
/// touches the same data directory must use the same value.
#[derive(Debug, Clone, Copy)]
pub struct Cipher {
    iterations: u32,
}

impl Cipher {
    pub fn new() -> Self {
        Self {
            iterations: KDF_ITERATIONS,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_iterations(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Derive the symmetric key. Same inputs always yield the same key.
    pub fn derive_key(&self, password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.iterations, &mut key[..]);
        key
    }

    /// Encrypt with a fresh salt and IV, returning the serialized blob
    pub fn encrypt(&self, plaintext: &[u8], password: &str) -> Result<String> {
        let salt = random_bytes::<SALT_LEN>();
        let iv = random_bytes::<IV_LEN>();

        let key = self.derive_key(password, &salt);
        let cipher = Aes256Gcm::new((&*key).into());

        // The AEAD output is ciphertext || tag
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| Error::CryptoError(e.to_string()))?;

        if sealed.len() < TAG_LEN {
            return Err(Error::CryptoError("ciphertext is missing its tag".to_string()));
        }
        let tag = sealed.split_off(sealed.len() - TAG_LEN);
        let auth_tag: [u8; TAG_LEN] = tag
            .try_into()
            .map_err(|_| Error::CryptoError("unexpected tag length".to_string()))?;

        let blob = EncryptedBlob {
            salt: salt.to_vec(),
            iv,
            auth_tag,
            ciphertext: sealed,
        };
        Ok(blob.to_string())
    }

    /// Decrypt a serialized blob. Either the exact plaintext comes back or an error.
    pub fn decrypt(&self, raw: &str, password: &str) -> Result<Vec<u8>> {
        let blob = EncryptedBlob::parse(raw)?;

        let key = self.derive_key(password, &blob.salt);
        let cipher = Aes256Gcm::new((&*key).into());

        let mut sealed = Vec::with_capacity(blob.ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(&blob.ciphertext);
        sealed.extend_from_slice(&blob.auth_tag);

        cipher
            .decrypt(Nonce::from_slice(&blob.iv), sealed.as_slice())
            .map_err(|_| Error::AuthenticationFailed)
    }

    /// Hex-encoded password hash, using the same KDF as key derivation
    pub fn hash_password(&self, password: &str, salt: &[u8]) -> String {
        hex::encode(*self.derive_key(password, salt))
    }

    /// Constant-time check of a password against a stored hash and salt (both hex)
    pub fn verify_password(&self, password: &str, stored_hash: &str, stored_salt: &str) -> bool {
        let (Ok(expected), Ok(salt)) = (hex::decode(stored_hash), hex::decode(stored_salt)) else {
            return false;
        };

        let derived = self.derive_key(password, &salt);
        derived.as_slice().ct_eq(expected.as_slice()).into()
    }
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh random salt for a password record
pub fn generate_salt() -> [u8; SALT_LEN] {
    random_bytes::<SALT_LEN>()
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::with_iterations(1_000)
    }

    #[test]
    fn test_round_trip() {
        let cipher = cipher();
        let large = "quota ".repeat(4096);

        for plaintext in ["", "hello", "配额 ✓ quota", large.as_str()] {
            let blob = cipher.encrypt(plaintext.as_bytes(), "hunter2").unwrap();
            let decrypted = cipher.decrypt(&blob, "hunter2").unwrap();
            assert_eq!(decrypted, plaintext.as_bytes());
        }
    }

    #[test]
    fn test_default_iterations_round_trip() {
        let cipher = Cipher::new();
        let blob = cipher.encrypt(b"{\"_version\":2}", "correct horse").unwrap();
        assert_eq!(cipher.decrypt(&blob, "correct horse").unwrap(), b"{\"_version\":2}");
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let cipher = cipher();
        let first = cipher.encrypt(b"same", "pw").unwrap();
        let second = cipher.encrypt(b"same", "pw").unwrap();
        assert_ne!(first, second);

        let first = EncryptedBlob::parse(&first).unwrap();
        let second = EncryptedBlob::parse(&second).unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.iv, second.iv);
    }

    #[test]
    fn test_blob_layout() {
        let blob = cipher().encrypt(b"abc", "pw").unwrap();
        let segments: Vec<&str> = blob.split(':').collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(segments[0].len(), SALT_LEN * 2);
        assert_eq!(segments[1].len(), IV_LEN * 2);
        assert_eq!(segments[2].len(), TAG_LEN * 2);
        assert_eq!(segments[3].len(), 3 * 2);
    }

    #[test]
    fn test_wrong_password_fails() {
        let cipher = cipher();
        let blob = cipher.encrypt(b"secret", "right").unwrap();
        assert!(matches!(
            cipher.decrypt(&blob, "wrong"),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_and_tag_fail() {
        let cipher = cipher();
        let raw = cipher.encrypt(b"some account tokens", "pw").unwrap();
        let blob = EncryptedBlob::parse(&raw).unwrap();

        for i in 0..blob.ciphertext.len() {
            let mut tampered = blob.clone();
            tampered.ciphertext[i] ^= 0x01;
            assert!(matches!(
                cipher.decrypt(&tampered.to_string(), "pw"),
                Err(Error::AuthenticationFailed)
            ));
        }

        for i in 0..TAG_LEN {
            let mut tampered = blob.clone();
            tampered.auth_tag[i] ^= 0x80;
            assert!(matches!(
                cipher.decrypt(&tampered.to_string(), "pw"),
                Err(Error::AuthenticationFailed)
            ));
        }
    }

    #[test]
    fn test_malformed_blobs() {
        let cipher = cipher();
        let raw = cipher.encrypt(b"x", "pw").unwrap();
        let segments: Vec<&str> = raw.split(':').collect();

        let too_few = segments[..3].join(":");
        let too_many = format!("{}:00", raw);
        let bad_hex = format!("zz:{}", segments[1..].join(":"));
        let short_iv = format!("{}:00ff:{}:{}", segments[0], segments[2], segments[3]);

        for bad in [too_few.as_str(), too_many.as_str(), bad_hex.as_str(), short_iv.as_str(), ""] {
            assert!(
                matches!(cipher.decrypt(bad, "pw"), Err(Error::MalformedBlob(_))),
                "expected malformed for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let cipher = cipher();
        let salt = generate_salt();
        assert_eq!(*cipher.derive_key("pw", &salt), *cipher.derive_key("pw", &salt));
        assert_ne!(*cipher.derive_key("pw", &salt), *cipher.derive_key("pw2", &salt));
    }

    #[test]
    fn test_password_hash_verification() {
        let cipher = cipher();
        let salt = generate_salt();
        let hash = cipher.hash_password("open sesame", &salt);
        let salt_hex = hex::encode(salt);

        assert_eq!(hash.len(), KEY_LEN * 2);
        assert!(cipher.verify_password("open sesame", &hash, &salt_hex));
        assert!(!cipher.verify_password("open sesame!", &hash, &salt_hex));
        assert!(!cipher.verify_password("open sesame", "not-hex", &salt_hex));
        assert!(!cipher.verify_password("open sesame", &hash[..10], &salt_hex));
    }
}
