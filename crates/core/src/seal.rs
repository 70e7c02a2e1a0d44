use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("token seal failed")]
    Seal,
    #[error("token unseal failed")]
    Unseal,
    #[error("sealing key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },
    #[error("sealing key is not valid hex")]
    KeyEncoding,
}

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// OAuth token material at rest. Holds ciphertext and nonce only; the
/// plaintext never appears in logs or serialized output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedToken {
    ciphertext: Vec<u8>,
    nonce: [u8; NONCE_LEN],
}

impl SealedToken {
    pub fn from_parts(ciphertext: Vec<u8>, nonce: [u8; NONCE_LEN]) -> Self {
        Self { ciphertext, nonce }
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }
}

/// Seals and unseals token material with ChaCha20-Poly1305. One sealer is
/// constructed at bootstrap from the configured key and shared by value.
#[derive(Clone)]
pub struct TokenSealer {
    key: [u8; KEY_LEN],
}

impl std::fmt::Debug for TokenSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSealer").finish_non_exhaustive()
    }
}

impl TokenSealer {
    pub fn from_key_material(key: &[u8]) -> Self {
        let mut fixed = [0u8; KEY_LEN];
        let len = key.len().min(KEY_LEN);
        fixed[..len].copy_from_slice(&key[..len]);
        Self { key: fixed }
    }

    pub fn from_hex_key(hex_key: &str) -> Result<Self, SealError> {
        let trimmed = hex_key.trim();
        if trimmed.len() != KEY_LEN * 2 {
            return Err(SealError::KeyLength { expected: KEY_LEN, actual: trimmed.len() / 2 });
        }
        let bytes = hex::decode(trimmed).map_err(|_| SealError::KeyEncoding)?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self { key })
    }

    pub fn seal(&self, plaintext: &str) -> Result<SealedToken, SealError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SealError::Seal)?;
        Ok(SealedToken { ciphertext, nonce })
    }

    pub fn unseal(&self, sealed: &SealedToken) -> Result<String, SealError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| SealError::Unseal)?;
        String::from_utf8(plaintext).map_err(|_| SealError::Unseal)
    }
}

#[cfg(test)]
mod tests {
    use super::{SealError, TokenSealer};

    #[test]
    fn seal_then_unseal_round_trips() {
        let sealer = TokenSealer::from_key_material(&[42u8; 32]);
        let sealed = sealer.seal("oauth-access-token").expect("seal");
        assert_ne!(sealed.ciphertext(), b"oauth-access-token");
        assert_eq!(sealer.unseal(&sealed).expect("unseal"), "oauth-access-token");
    }

    #[test]
    fn distinct_seals_use_distinct_nonces() {
        let sealer = TokenSealer::from_key_material(&[42u8; 32]);
        let first = sealer.seal("token").expect("seal");
        let second = sealer.seal("token").expect("seal");
        assert_ne!(first.nonce(), second.nonce());
        assert_ne!(first.ciphertext(), second.ciphertext());
    }

    #[test]
    fn unseal_with_wrong_key_fails() {
        let sealer = TokenSealer::from_key_material(&[42u8; 32]);
        let other = TokenSealer::from_key_material(&[43u8; 32]);
        let sealed = sealer.seal("token").expect("seal");
        assert!(matches!(other.unseal(&sealed), Err(SealError::Unseal)));
    }

    #[test]
    fn hex_key_parsing_validates_length_and_digits() {
        let valid = "00".repeat(32);
        assert!(TokenSealer::from_hex_key(&valid).is_ok());
        assert!(matches!(
            TokenSealer::from_hex_key("abcd"),
            Err(SealError::KeyLength { .. })
        ));
        let invalid = "zz".repeat(32);
        assert!(matches!(TokenSealer::from_hex_key(&invalid), Err(SealError::KeyEncoding)));
    }
}
