//! KMS adapter
//!
//! Abstracts three backends behind one trait: a local-file master key (dev),
//! a Vault transit engine, and a cloud KMS (behind the `aws-kms` feature).
//! Only this module speaks to key-management infrastructure; everything else
//! works with wrapped/unwrapped DEK bytes.

mod local;
mod vault;

#[cfg(feature = "aws-kms")]
mod aws;

pub use local::LocalKms;
pub use vault::VaultTransitKms;

#[cfg(feature = "aws-kms")]
pub use aws::AwsKms;

use async_trait::async_trait;
use rem_core::{CryptoConfig, KmsError, KmsProvider};
use std::sync::Arc;
use zeroize::Zeroizing;

/// One key-management backend.
///
/// `context` binds a wrap to its tenant; unwrapping with a different context
/// fails. Blob operations are the transit mode used for small payloads.
#[async_trait]
pub trait KmsBackend: Send + Sync {
    /// Wrap a plaintext DEK under the master key.
    async fn wrap_dek(&self, plaintext_dek: &[u8], context: &str) -> Result<Vec<u8>, KmsError>;

    /// Unwrap a wrapped DEK. The plaintext is zeroized on drop.
    async fn unwrap_dek(
        &self,
        wrapped_dek: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;

    /// Transit-encrypt a small payload.
    async fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Transit-decrypt a small payload.
    async fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Identifier recorded on `tenant_keys.kms_key_id`.
    fn key_id(&self) -> &str;
}

/// Construct the configured backend.
pub async fn backend_from_config(config: &CryptoConfig) -> Result<Arc<dyn KmsBackend>, KmsError> {
    match config.kms_provider {
        KmsProvider::Local => {
            let kms = LocalKms::from_key_file(&config.local_key_path).await?;
            Ok(Arc::new(kms))
        }
        KmsProvider::Vault => {
            let token = config.vault_token.clone().ok_or_else(|| KmsError::AuthError {
                reason: "P8_VAULT_TOKEN is required for the vault backend".to_string(),
            })?;
            Ok(Arc::new(VaultTransitKms::new(
                &config.vault_addr,
                &config.vault_transit_key,
                token,
                config.kms_timeout,
            )))
        }
        KmsProvider::Aws => aws_backend(config).await,
    }
}

#[cfg(feature = "aws-kms")]
async fn aws_backend(config: &CryptoConfig) -> Result<Arc<dyn KmsBackend>, KmsError> {
    let key_id = config.aws_key_id.clone().ok_or_else(|| KmsError::AuthError {
        reason: "P8_AWS_KMS_KEY_ID is required for the aws backend".to_string(),
    })?;
    Ok(Arc::new(aws::AwsKms::from_env(key_id).await))
}

#[cfg(not(feature = "aws-kms"))]
async fn aws_backend(_config: &CryptoConfig) -> Result<Arc<dyn KmsBackend>, KmsError> {
    Err(KmsError::Unavailable {
        reason: "built without the aws-kms feature".to_string(),
    })
}
