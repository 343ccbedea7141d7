//! Tenant encryption service
//!
//! Owns the mode policy: which level a write gets (including the chat-path
//! sealed→platform cap), which reads the server may decrypt, and the lazy
//! DEK lifecycle (generate → wrap → persist → cache → re-unwrap on miss).

use crate::kms::KmsBackend;
use crate::{
    aead, decrypt_field, encrypt_field, encrypt_field_deterministic, field_aad, seal_field,
    DekCache,
};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use rem_core::{
    CryptoConfig, CryptoError, EncryptionLevel, EncryptionMode, KmsError, StoreError,
    TenantKeyRecord,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Persistence seam for `tenant_keys`. Implemented by the store crate; kept
/// as a trait here so the crypto layer has no database dependency.
#[async_trait]
pub trait TenantKeyStore: Send + Sync {
    async fn load(&self, tenant_id: &str) -> Result<Option<TenantKeyRecord>, StoreError>;
    async fn save(&self, record: &TenantKeyRecord) -> Result<(), StoreError>;
}

/// Outcome of a field read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Server-decryptable (or never encrypted); plaintext returned.
    Plaintext(String),
    /// Client or sealed row; ciphertext returned for client-side decryption.
    Ciphertext(String),
}

impl FieldValue {
    pub fn into_string(self) -> String {
        match self {
            FieldValue::Plaintext(s) | FieldValue::Ciphertext(s) => s,
        }
    }
}

struct CachedMode {
    mode: EncryptionMode,
    inserted_at: Instant,
}

pub struct EncryptionService {
    kms: Arc<dyn KmsBackend>,
    keys: Arc<dyn TenantKeyStore>,
    dek_cache: DekCache,
    mode_cache: DashMap<String, CachedMode>,
    config: CryptoConfig,
}

impl EncryptionService {
    pub fn new(
        kms: Arc<dyn KmsBackend>,
        keys: Arc<dyn TenantKeyStore>,
        config: CryptoConfig,
    ) -> Self {
        Self {
            kms,
            keys,
            dek_cache: DekCache::new(config.dek_cache_ttl, config.dek_cache_capacity),
            mode_cache: DashMap::new(),
            config,
        }
    }

    /// Bound a KMS call by the configured deadline.
    async fn kms_call<T, F>(&self, fut: F) -> Result<T, KmsError>
    where
        F: Future<Output = Result<T, KmsError>>,
    {
        tokio::time::timeout(self.config.kms_timeout, fut)
            .await
            .map_err(|_| KmsError::Unavailable {
                reason: format!("KMS call exceeded {:?}", self.config.kms_timeout),
            })?
    }

    /// Configure (or reconfigure) a tenant's encryption.
    ///
    /// A fresh 256-bit DEK is generated lazily on first call, wrapped by the
    /// KMS master key, and persisted. Reconfiguration updates the mode and
    /// public key but keeps the DEK so existing ciphertexts stay readable.
    pub async fn configure(
        &self,
        tenant_id: &str,
        mode: EncryptionMode,
        public_key_pem: Option<String>,
    ) -> Result<TenantKeyRecord, CryptoError> {
        let record = match self.keys.load(tenant_id).await.map_err(store_to_crypto)? {
            Some(mut existing) => {
                existing.mode = mode;
                if public_key_pem.is_some() {
                    existing.public_key_pem = public_key_pem;
                }
                existing
            }
            None => {
                let mut dek_bytes = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut dek_bytes);
                let dek = Zeroizing::new(dek_bytes);
                let wrapped = self
                    .kms_call(self.kms.wrap_dek(&dek, tenant_id))
                    .await?;
                tracing::info!(tenant_id, %mode, "generated tenant DEK");
                TenantKeyRecord {
                    tenant_id: tenant_id.to_string(),
                    wrapped_dek: wrapped,
                    kms_key_id: self.kms.key_id().to_string(),
                    algorithm: "aes-256-gcm".to_string(),
                    mode,
                    public_key_pem,
                    rotated_at: None,
                    created_at: chrono::Utc::now(),
                }
            }
        };

        self.keys.save(&record).await.map_err(store_to_crypto)?;
        self.mode_cache.remove(tenant_id);
        self.dek_cache.invalidate(tenant_id);
        Ok(record)
    }

    /// The tenant's configured write mode. Cached with the same TTL as DEKs.
    pub async fn tenant_mode(&self, tenant_id: &str) -> Result<EncryptionMode, CryptoError> {
        if let Some(cached) = self.mode_cache.get(tenant_id) {
            if cached.inserted_at.elapsed() < self.config.dek_cache_ttl {
                return Ok(cached.mode);
            }
        }
        let mode = self
            .keys
            .load(tenant_id)
            .await
            .map_err(store_to_crypto)?
            .map(|r| r.mode)
            .unwrap_or(EncryptionMode::Disabled);
        self.mode_cache.insert(
            tenant_id.to_string(),
            CachedMode {
                mode,
                inserted_at: Instant::now(),
            },
        );
        Ok(mode)
    }

    /// The level a write will carry under `mode`.
    ///
    /// History must stay readable by the server so the LLM can replay prior
    /// turns, hence sealed tenants get platform-level messages on the chat
    /// path. Every row records the level actually used.
    pub fn effective_level(mode: EncryptionMode, chat_path: bool) -> EncryptionLevel {
        match (mode, chat_path) {
            (EncryptionMode::Sealed, true) => EncryptionLevel::Platform,
            (mode, _) => mode.write_level(),
        }
    }

    /// Plaintext DEK for a tenant, through the cache.
    async fn dek(&self, tenant_id: &str) -> Result<Arc<Zeroizing<Vec<u8>>>, CryptoError> {
        if let Some(key) = self.dek_cache.get(tenant_id) {
            return Ok(key);
        }
        let record = self
            .keys
            .load(tenant_id)
            .await
            .map_err(store_to_crypto)?
            .ok_or_else(|| CryptoError::EncryptKeyMissing {
                tenant_id: tenant_id.to_string(),
            })?;
        let plaintext = self
            .kms_call(self.kms.unwrap_dek(&record.wrapped_dek, tenant_id))
            .await?;
        Ok(self.dek_cache.insert(tenant_id, plaintext))
    }

    /// Encrypt a designated field for a row at the given level.
    pub async fn encrypt(
        &self,
        tenant_id: &str,
        entity_id: Uuid,
        plaintext: &str,
        level: EncryptionLevel,
    ) -> Result<String, CryptoError> {
        let aad = field_aad(tenant_id, entity_id);
        match level {
            EncryptionLevel::None | EncryptionLevel::Disabled => Ok(plaintext.to_string()),
            EncryptionLevel::Platform | EncryptionLevel::Client => {
                let dek = self.dek(tenant_id).await?;
                encrypt_field(&dek, plaintext, &aad)
            }
            EncryptionLevel::Sealed => {
                let record = self
                    .keys
                    .load(tenant_id)
                    .await
                    .map_err(store_to_crypto)?
                    .ok_or_else(|| CryptoError::EncryptKeyMissing {
                        tenant_id: tenant_id.to_string(),
                    })?;
                let pem = record.public_key_pem.as_deref().ok_or_else(|| {
                    CryptoError::EncryptKeyMissing {
                        tenant_id: tenant_id.to_string(),
                    }
                })?;
                seal_field(pem, plaintext, &aad)
            }
        }
    }

    /// Deterministic encoding for equality-searchable fields (`users.email`).
    ///
    /// The AAD binds the tenant only — binding the row id would produce a
    /// different ciphertext per row and defeat equality search. Refused once
    /// the DEK has rotated: the nonce derives from the plaintext under the
    /// original key, so historical ciphertexts would no longer match.
    pub async fn encrypt_deterministic(
        &self,
        tenant_id: &str,
        plaintext: &str,
    ) -> Result<String, CryptoError> {
        let record = self
            .keys
            .load(tenant_id)
            .await
            .map_err(store_to_crypto)?
            .ok_or_else(|| CryptoError::EncryptKeyMissing {
                tenant_id: tenant_id.to_string(),
            })?;
        if record.rotated_at.is_some() {
            return Err(CryptoError::RotationUnsupported {
                tenant_id: tenant_id.to_string(),
            });
        }
        let dek = self.dek(tenant_id).await?;
        encrypt_field_deterministic(&dek, plaintext, deterministic_aad(tenant_id).as_slice())
    }

    /// Decrypt a deterministically encoded field.
    pub async fn read_deterministic(
        &self,
        tenant_id: &str,
        stored: &str,
    ) -> Result<String, CryptoError> {
        let dek = self.dek(tenant_id).await?;
        decrypt_field(
            &dek,
            stored,
            deterministic_aad(tenant_id).as_slice(),
            Uuid::nil(),
        )
    }

    /// Read a stored field according to the level stamped on its row.
    pub async fn read(
        &self,
        tenant_id: &str,
        entity_id: Uuid,
        stored: &str,
        level: EncryptionLevel,
    ) -> Result<FieldValue, CryptoError> {
        match level {
            EncryptionLevel::None | EncryptionLevel::Disabled => {
                Ok(FieldValue::Plaintext(stored.to_string()))
            }
            EncryptionLevel::Platform => {
                let dek = self.dek(tenant_id).await?;
                decrypt_field(&dek, stored, &field_aad(tenant_id, entity_id), entity_id)
                    .map(FieldValue::Plaintext)
            }
            EncryptionLevel::Client | EncryptionLevel::Sealed => {
                Ok(FieldValue::Ciphertext(stored.to_string()))
            }
        }
    }

    /// Read a field the caller requires in plaintext. Client and sealed rows
    /// reject with `ModeMismatch` — the caller should fetch ciphertext and
    /// decrypt client-side.
    pub async fn read_plaintext(
        &self,
        tenant_id: &str,
        entity_id: Uuid,
        stored: &str,
        level: EncryptionLevel,
    ) -> Result<String, CryptoError> {
        match self.read(tenant_id, entity_id, stored, level).await? {
            FieldValue::Plaintext(s) => Ok(s),
            FieldValue::Ciphertext(_) => Err(CryptoError::ModeMismatch {
                entity_id,
                row_level: level,
            }),
        }
    }

    /// Sanity predicate used by callers that branch on wire shape.
    pub fn looks_encrypted(value: &str) -> bool {
        aead::is_ciphertext(value) || crate::is_sealed(value)
    }
}

/// AAD for the deterministic field family: tenant-scoped, row-independent.
fn deterministic_aad(tenant_id: &str) -> Vec<u8> {
    format!("{tenant_id}:deterministic").into_bytes()
}

fn store_to_crypto(err: StoreError) -> CryptoError {
    match err {
        StoreError::Crypto(inner) => inner,
        other => CryptoError::Kms(KmsError::Unavailable {
            reason: format!("tenant key store unavailable: {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::LocalKms;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MemoryKeyStore {
        rows: Mutex<HashMap<String, TenantKeyRecord>>,
    }

    impl MemoryKeyStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl TenantKeyStore for MemoryKeyStore {
        async fn load(&self, tenant_id: &str) -> Result<Option<TenantKeyRecord>, StoreError> {
            Ok(self.rows.lock().unwrap().get(tenant_id).cloned())
        }

        async fn save(&self, record: &TenantKeyRecord) -> Result<(), StoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(record.tenant_id.clone(), record.clone());
            Ok(())
        }
    }

    fn service() -> EncryptionService {
        let kms = Arc::new(LocalKms::from_key_bytes(vec![5u8; 32]).unwrap());
        EncryptionService::new(kms, Arc::new(MemoryKeyStore::new()), CryptoConfig::default())
    }

    #[tokio::test]
    async fn configure_then_encrypt_then_read_round_trips() {
        let svc = service();
        svc.configure("t1", EncryptionMode::Platform, None)
            .await
            .unwrap();
        let entity = Uuid::new_v4();
        let ct = svc
            .encrypt("t1", entity, "hello", EncryptionLevel::Platform)
            .await
            .unwrap();
        assert_ne!(ct, "hello");
        let value = svc
            .read("t1", entity, &ct, EncryptionLevel::Platform)
            .await
            .unwrap();
        assert_eq!(value, FieldValue::Plaintext("hello".to_string()));
    }

    #[tokio::test]
    async fn reconfigure_keeps_the_dek() {
        let svc = service();
        svc.configure("t1", EncryptionMode::Platform, None)
            .await
            .unwrap();
        let entity = Uuid::new_v4();
        let ct = svc
            .encrypt("t1", entity, "before", EncryptionLevel::Platform)
            .await
            .unwrap();

        // Mode change must not invalidate existing ciphertexts.
        svc.configure("t1", EncryptionMode::Client, None)
            .await
            .unwrap();
        let value = svc
            .read("t1", entity, &ct, EncryptionLevel::Platform)
            .await
            .unwrap();
        assert_eq!(value, FieldValue::Plaintext("before".to_string()));
    }

    #[tokio::test]
    async fn client_rows_return_ciphertext() {
        let svc = service();
        svc.configure("t1", EncryptionMode::Client, None)
            .await
            .unwrap();
        let entity = Uuid::new_v4();
        let ct = svc
            .encrypt("t1", entity, "private", EncryptionLevel::Client)
            .await
            .unwrap();
        match svc.read("t1", entity, &ct, EncryptionLevel::Client).await.unwrap() {
            FieldValue::Ciphertext(returned) => assert_eq!(returned, ct),
            other => panic!("expected ciphertext, got {other:?}"),
        }
        let err = svc
            .read_plaintext("t1", entity, &ct, EncryptionLevel::Client)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::ModeMismatch { .. }));
    }

    #[tokio::test]
    async fn sealed_chat_path_caps_to_platform() {
        assert_eq!(
            EncryptionService::effective_level(EncryptionMode::Sealed, true),
            EncryptionLevel::Platform
        );
        assert_eq!(
            EncryptionService::effective_level(EncryptionMode::Sealed, false),
            EncryptionLevel::Sealed
        );
        assert_eq!(
            EncryptionService::effective_level(EncryptionMode::Platform, true),
            EncryptionLevel::Platform
        );
        assert_eq!(
            EncryptionService::effective_level(EncryptionMode::Disabled, true),
            EncryptionLevel::Disabled
        );
    }

    #[tokio::test]
    async fn deterministic_email_is_searchable() {
        let svc = service();
        svc.configure("t1", EncryptionMode::Platform, None)
            .await
            .unwrap();
        let a = svc.encrypt_deterministic("t1", "a@example.com").await.unwrap();
        let b = svc.encrypt_deterministic("t1", "a@example.com").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            svc.read_deterministic("t1", &a).await.unwrap(),
            "a@example.com"
        );
    }

    #[tokio::test]
    async fn deterministic_refuses_after_rotation() {
        let svc = service();
        let mut record = svc
            .configure("t1", EncryptionMode::Platform, None)
            .await
            .unwrap();
        record.rotated_at = Some(chrono::Utc::now());
        svc.keys.save(&record).await.unwrap();
        let err = svc
            .encrypt_deterministic("t1", "a@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::RotationUnsupported { .. }));
    }

    #[tokio::test]
    async fn missing_tenant_key_is_surfaced() {
        let svc = service();
        let err = svc
            .encrypt("ghost", Uuid::nil(), "x", EncryptionLevel::Platform)
            .await
            .unwrap_err();
        assert!(matches!(err, CryptoError::EncryptKeyMissing { .. }));
    }
}
