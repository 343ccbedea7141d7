//! AEAD field encryption
//!
//! AES-256-GCM with a random nonce for normal fields and an HMAC-derived
//! nonce for fields requiring equality search. Ciphertext wire format is
//! `v1:` + base64(nonce ‖ ct); the AAD binds a value to its
//! `tenant_id:entity_id` so ciphertexts cannot be relocated between rows or
//! tenants.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rem_core::CryptoError;
use sha2::Sha256;
use uuid::Uuid;

const NONCE_LEN: usize = 12;
const WIRE_PREFIX: &str = "v1:";

/// Build the AAD for a field: `tenant_id:entity_id`.
pub fn field_aad(tenant_id: &str, entity_id: Uuid) -> Vec<u8> {
    format!("{tenant_id}:{entity_id}").into_bytes()
}

/// Whether a stored value carries the AEAD wire prefix.
pub fn is_ciphertext(value: &str) -> bool {
    value.starts_with(WIRE_PREFIX)
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::MalformedCiphertext {
        reason: "DEK has invalid length".to_string(),
    })
}

fn seal_with_nonce(
    key: &[u8],
    nonce_bytes: [u8; NONCE_LEN],
    plaintext: &str,
    aad: &[u8],
) -> Result<String, CryptoError> {
    let cipher = cipher(key)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext.as_bytes(),
                aad,
            },
        )
        .map_err(|_| CryptoError::MalformedCiphertext {
            reason: "AEAD encryption failed".to_string(),
        })?;
    let mut raw = Vec::with_capacity(NONCE_LEN + ct.len());
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&ct);
    Ok(format!("{WIRE_PREFIX}{}", B64.encode(raw)))
}

/// Encrypt a field with a fresh random nonce.
pub fn encrypt_field(key: &[u8], plaintext: &str, aad: &[u8]) -> Result<String, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    seal_with_nonce(key, nonce, plaintext, aad)
}

/// Deterministic variant for equality-searchable fields.
///
/// Nonce = HMAC-SHA256(key, plaintext) truncated to 96 bits, so equal
/// plaintexts under one DEK produce identical ciphertexts without exposing
/// the plaintext.
pub fn encrypt_field_deterministic(
    key: &[u8],
    plaintext: &str,
    aad: &[u8],
) -> Result<String, CryptoError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(|_| {
        CryptoError::MalformedCiphertext {
            reason: "DEK has invalid length for nonce derivation".to_string(),
        }
    })?;
    mac.update(plaintext.as_bytes());
    let digest = mac.finalize().into_bytes();
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    seal_with_nonce(key, nonce, plaintext, aad)
}

/// Decrypt a `v1:` wire value.
pub fn decrypt_field(
    key: &[u8],
    stored: &str,
    aad: &[u8],
    entity_id: Uuid,
) -> Result<String, CryptoError> {
    let encoded = stored
        .strip_prefix(WIRE_PREFIX)
        .ok_or_else(|| CryptoError::MalformedCiphertext {
            reason: "missing v1 wire prefix".to_string(),
        })?;
    let raw = B64.decode(encoded).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("wire value is not valid base64: {e}"),
    })?;
    if raw.len() <= NONCE_LEN {
        return Err(CryptoError::MalformedCiphertext {
            reason: "wire value shorter than nonce".to_string(),
        });
    }
    let (nonce_bytes, ct) = raw.split_at(NONCE_LEN);
    let cipher = cipher(key)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ct, aad })
        .map_err(|_| CryptoError::DecryptAuthFail { entity_id })?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::MalformedCiphertext {
        reason: "decrypted field is not UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 32] = [9u8; 32];

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let entity = Uuid::new_v4();
        let aad = field_aad("tenant-a", entity);
        let ct = encrypt_field(&KEY, "secret text", &aad).unwrap();
        assert!(is_ciphertext(&ct));
        assert_eq!(decrypt_field(&KEY, &ct, &aad, entity).unwrap(), "secret text");
    }

    #[test]
    fn swapping_aad_fails_auth() {
        let entity = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ct = encrypt_field(&KEY, "secret", &field_aad("tenant-a", entity)).unwrap();
        let err = decrypt_field(&KEY, &ct, &field_aad("tenant-a", other), other).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptAuthFail { .. }));
        let err = decrypt_field(&KEY, &ct, &field_aad("tenant-b", entity), entity).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptAuthFail { .. }));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let entity = Uuid::new_v4();
        let aad = field_aad("tenant-a", entity);
        let ct = encrypt_field(&KEY, "secret", &aad).unwrap();
        let err = decrypt_field(&[1u8; 32], &ct, &aad, entity).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptAuthFail { .. }));
    }

    #[test]
    fn deterministic_encoding_is_stable_for_equal_plaintexts() {
        let entity = Uuid::nil();
        let aad = field_aad("tenant-a", entity);
        let a = encrypt_field_deterministic(&KEY, "user@example.com", &aad).unwrap();
        let b = encrypt_field_deterministic(&KEY, "user@example.com", &aad).unwrap();
        assert_eq!(a, b);
        let c = encrypt_field_deterministic(&KEY, "other@example.com", &aad).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn random_nonces_differ_between_calls() {
        let aad = field_aad("tenant-a", Uuid::nil());
        let a = encrypt_field(&KEY, "same", &aad).unwrap();
        let b = encrypt_field(&KEY, "same", &aad).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_wire_values_are_malformed_not_auth_failures() {
        let entity = Uuid::nil();
        let aad = field_aad("t", entity);
        assert!(matches!(
            decrypt_field(&KEY, "plaintext", &aad, entity).unwrap_err(),
            CryptoError::MalformedCiphertext { .. }
        ));
        assert!(matches!(
            decrypt_field(&KEY, "v1:!!!", &aad, entity).unwrap_err(),
            CryptoError::MalformedCiphertext { .. }
        ));
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_text(s in "\\PC{0,128}") {
            let entity = Uuid::nil();
            let aad = field_aad("tenant-prop", entity);
            let ct = encrypt_field(&KEY, &s, &aad).unwrap();
            prop_assert_eq!(decrypt_field(&KEY, &ct, &aad, entity).unwrap(), s);
        }
    }
}
