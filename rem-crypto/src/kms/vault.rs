//! Vault transit-engine KMS backend
//!
//! Wraps and unwraps DEKs through `transit/encrypt/:key` and
//! `transit/decrypt/:key`. The transit key never leaves Vault; we move
//! base64 blobs.

use super::KmsBackend;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rem_core::KmsError;
use serde::Deserialize;
use std::time::Duration;
use zeroize::Zeroizing;

pub struct VaultTransitKms {
    http: reqwest::Client,
    addr: String,
    key_name: String,
    token: String,
}

#[derive(Deserialize)]
struct TransitData {
    #[serde(default)]
    ciphertext: Option<String>,
    #[serde(default)]
    plaintext: Option<String>,
}

#[derive(Deserialize)]
struct TransitResponse {
    data: TransitData,
}

impl VaultTransitKms {
    pub fn new(addr: &str, key_name: &str, token: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            addr: addr.trim_end_matches('/').to_string(),
            key_name: key_name.to_string(),
            token,
        }
    }

    async fn transit_call(
        &self,
        operation: &str,
        body: serde_json::Value,
    ) -> Result<TransitData, KmsError> {
        let url = format!("{}/v1/transit/{}/{}", self.addr, operation, self.key_name);
        let response = self
            .http
            .post(&url)
            .header("X-Vault-Token", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| KmsError::Unavailable {
                reason: format!("vault request failed: {e}"),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(KmsError::AuthError {
                reason: format!("vault rejected token for {operation}"),
            });
        }
        if !status.is_success() {
            return Err(KmsError::Unavailable {
                reason: format!("vault returned {status} for {operation}"),
            });
        }

        let parsed: TransitResponse =
            response.json().await.map_err(|e| KmsError::Corrupt {
                reason: format!("vault response was not valid JSON: {e}"),
            })?;
        Ok(parsed.data)
    }

    fn decode_plaintext(data: TransitData) -> Result<Vec<u8>, KmsError> {
        let b64 = data.plaintext.ok_or_else(|| KmsError::Corrupt {
            reason: "vault decrypt response missing plaintext".to_string(),
        })?;
        B64.decode(b64).map_err(|e| KmsError::Corrupt {
            reason: format!("vault plaintext is not valid base64: {e}"),
        })
    }

    fn extract_ciphertext(data: TransitData) -> Result<Vec<u8>, KmsError> {
        let ct = data.ciphertext.ok_or_else(|| KmsError::Corrupt {
            reason: "vault encrypt response missing ciphertext".to_string(),
        })?;
        // Ciphertexts look like `vault:v1:<b64>`; stored verbatim so Vault can
        // route future decrypts to the right key version.
        Ok(ct.into_bytes())
    }
}

#[async_trait]
impl KmsBackend for VaultTransitKms {
    async fn wrap_dek(&self, plaintext_dek: &[u8], context: &str) -> Result<Vec<u8>, KmsError> {
        let body = serde_json::json!({
            "plaintext": B64.encode(plaintext_dek),
            "context": B64.encode(context.as_bytes()),
        });
        let data = self.transit_call("encrypt", body).await?;
        Self::extract_ciphertext(data)
    }

    async fn unwrap_dek(
        &self,
        wrapped_dek: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let ciphertext = String::from_utf8(wrapped_dek.to_vec()).map_err(|_| KmsError::Corrupt {
            reason: "stored vault ciphertext is not UTF-8".to_string(),
        })?;
        let body = serde_json::json!({
            "ciphertext": ciphertext,
            "context": B64.encode(context.as_bytes()),
        });
        let data = self.transit_call("decrypt", body).await?;
        Self::decode_plaintext(data).map(Zeroizing::new)
    }

    async fn encrypt_blob(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let body = serde_json::json!({ "plaintext": B64.encode(plaintext) });
        let data = self.transit_call("encrypt", body).await?;
        Self::extract_ciphertext(data)
    }

    async fn decrypt_blob(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let ct = String::from_utf8(ciphertext.to_vec()).map_err(|_| KmsError::Corrupt {
            reason: "stored vault ciphertext is not UTF-8".to_string(),
        })?;
        let body = serde_json::json!({ "ciphertext": ct });
        let data = self.transit_call("decrypt", body).await?;
        Self::decode_plaintext(data)
    }

    fn key_id(&self) -> &str {
        &self.key_name
    }
}
