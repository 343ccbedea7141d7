//! AWS KMS backend (feature `aws-kms`)

use super::KmsBackend;
use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use rem_core::KmsError;
use zeroize::Zeroizing;

const CONTEXT_KEY: &str = "rem:tenant";

pub struct AwsKms {
    client: aws_sdk_kms::Client,
    key_id: String,
}

impl AwsKms {
    /// Build a client from the ambient AWS environment (credentials chain,
    /// region resolution).
    pub async fn from_env(key_id: String) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: aws_sdk_kms::Client::new(&config),
            key_id,
        }
    }

    fn map_sdk_error<E: std::fmt::Display>(err: E) -> KmsError {
        let text = err.to_string();
        if text.contains("AccessDenied") || text.contains("UnrecognizedClient") {
            KmsError::AuthError { reason: text }
        } else {
            KmsError::Unavailable { reason: text }
        }
    }
}

#[async_trait]
impl KmsBackend for AwsKms {
    async fn wrap_dek(&self, plaintext_dek: &[u8], context: &str) -> Result<Vec<u8>, KmsError> {
        let response = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext_dek))
            .encryption_context(CONTEXT_KEY, context)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        response
            .ciphertext_blob()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| KmsError::Corrupt {
                reason: "KMS encrypt response contained no ciphertext".to_string(),
            })
    }

    async fn unwrap_dek(
        &self,
        wrapped_dek: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let response = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(wrapped_dek))
            .encryption_context(CONTEXT_KEY, context)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        response
            .plaintext()
            .map(|b| Zeroizing::new(b.as_ref().to_vec()))
            .ok_or_else(|| KmsError::Corrupt {
                reason: "KMS decrypt response contained no plaintext".to_string(),
            })
    }

    async fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let response = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        response
            .ciphertext_blob()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| KmsError::Corrupt {
                reason: "KMS encrypt response contained no ciphertext".to_string(),
            })
    }

    async fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let response = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        response
            .plaintext()
            .map(|b| b.as_ref().to_vec())
            .ok_or_else(|| KmsError::Corrupt {
                reason: "KMS decrypt response contained no plaintext".to_string(),
            })
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}
