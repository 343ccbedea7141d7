//! Local-file KMS backend
//!
//! Dev/test backend: a 32-byte master key read from disk (hex-encoded), used
//! directly for AES-256-GCM wrapping. Not for production.

use super::KmsBackend;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use rem_core::KmsError;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;

/// Master key held in memory for the lifetime of the process.
pub struct LocalKms {
    master_key: Zeroizing<Vec<u8>>,
    key_id: String,
}

impl LocalKms {
    /// Read a hex-encoded 32-byte master key from `path`.
    pub async fn from_key_file(path: &str) -> Result<Self, KmsError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| KmsError::Unavailable {
                reason: format!("cannot read master key file {path}: {e}"),
            })?;
        let bytes = hex::decode(raw.trim()).map_err(|e| KmsError::Corrupt {
            reason: format!("master key file is not valid hex: {e}"),
        })?;
        Self::from_key_bytes(bytes)
    }

    /// Construct from raw key bytes. Exposed for tests.
    pub fn from_key_bytes(bytes: Vec<u8>) -> Result<Self, KmsError> {
        if bytes.len() != 32 {
            return Err(KmsError::Corrupt {
                reason: format!("master key must be 32 bytes, got {}", bytes.len()),
            });
        }
        Ok(Self {
            master_key: Zeroizing::new(bytes),
            key_id: "local".to_string(),
        })
    }

    fn cipher(&self) -> Result<Aes256Gcm, KmsError> {
        Aes256Gcm::new_from_slice(&self.master_key).map_err(|_| KmsError::Corrupt {
            reason: "master key has invalid length".to_string(),
        })
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        let cipher = self.cipher()?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ct = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| KmsError::Corrupt {
                reason: "local wrap failed".to_string(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn open(&self, wrapped: &[u8], aad: &[u8]) -> Result<Vec<u8>, KmsError> {
        if wrapped.len() <= NONCE_LEN {
            return Err(KmsError::Corrupt {
                reason: "wrapped payload too short".to_string(),
            });
        }
        let cipher = self.cipher()?;
        let (nonce_bytes, ct) = wrapped.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|_| KmsError::AuthError {
                reason: "local unwrap authentication failed".to_string(),
            })
    }
}

#[async_trait]
impl KmsBackend for LocalKms {
    async fn wrap_dek(&self, plaintext_dek: &[u8], context: &str) -> Result<Vec<u8>, KmsError> {
        self.seal(plaintext_dek, context.as_bytes())
    }

    async fn unwrap_dek(
        &self,
        wrapped_dek: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        self.open(wrapped_dek, context.as_bytes()).map(Zeroizing::new)
    }

    async fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.seal(plaintext, b"")
    }

    async fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        self.open(ciphertext, b"")
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kms() -> LocalKms {
        LocalKms::from_key_bytes(vec![7u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn wrap_unwrap_round_trips() {
        let kms = test_kms();
        let dek = vec![42u8; 32];
        let wrapped = kms.wrap_dek(&dek, "tenant-a").await.unwrap();
        let unwrapped = kms.unwrap_dek(&wrapped, "tenant-a").await.unwrap();
        assert_eq!(&*unwrapped, &dek);
    }

    #[tokio::test]
    async fn context_binding_is_enforced() {
        let kms = test_kms();
        let wrapped = kms.wrap_dek(&[1u8; 32], "tenant-a").await.unwrap();
        let err = kms.unwrap_dek(&wrapped, "tenant-b").await.unwrap_err();
        assert!(matches!(err, KmsError::AuthError { .. }));
    }

    #[tokio::test]
    async fn blob_round_trips() {
        let kms = test_kms();
        let ct = kms.encrypt_blob(b"small payload").await.unwrap();
        assert_eq!(kms.decrypt_blob(&ct).await.unwrap(), b"small payload");
    }

    #[test]
    fn short_keys_are_rejected() {
        assert!(LocalKms::from_key_bytes(vec![0u8; 16]).is_err());
    }
}
