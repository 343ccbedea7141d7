//! Sealed-mode hybrid encryption
//!
//! A random ephemeral AES key encrypts the field; the ephemeral key is
//! wrapped with the tenant's RSA public key (OAEP-SHA256). The server never
//! holds the private key, so sealed rows are opaque to every read path but
//! the client's.

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use rem_core::CryptoError;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const WIRE_PREFIX: &str = "sealed.v1:";

/// JSON envelope carried inside the wire value.
#[derive(Debug, Serialize, Deserialize)]
struct SealedEnvelope {
    /// Ephemeral AES key wrapped with the tenant public key.
    ek: String,
    /// AEAD nonce.
    n: String,
    /// AEAD ciphertext.
    ct: String,
}

/// Whether a stored value is a sealed envelope.
pub fn is_sealed(value: &str) -> bool {
    value.starts_with(WIRE_PREFIX)
}

/// Seal a field under the tenant's RSA public key (PEM).
pub fn seal_field(
    public_key_pem: &str,
    plaintext: &str,
    aad: &[u8],
) -> Result<String, CryptoError> {
    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|e| {
            CryptoError::MalformedCiphertext {
                reason: format!("tenant public key is not valid PEM: {e}"),
            }
        })?;

    let mut ephemeral_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut ephemeral_bytes);
    let ephemeral = Zeroizing::new(ephemeral_bytes);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(ephemeral.as_ref()).map_err(|_| {
        CryptoError::MalformedCiphertext {
            reason: "ephemeral key has invalid length".to_string(),
        }
    })?;
    let ct = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: plaintext.as_bytes(),
                aad,
            },
        )
        .map_err(|_| CryptoError::MalformedCiphertext {
            reason: "sealed AEAD encryption failed".to_string(),
        })?;

    let wrapped_key = public_key
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), ephemeral.as_ref())
        .map_err(|e| CryptoError::MalformedCiphertext {
            reason: format!("RSA wrap failed: {e}"),
        })?;

    let envelope = SealedEnvelope {
        ek: B64.encode(wrapped_key),
        n: B64.encode(nonce_bytes),
        ct: B64.encode(ct),
    };
    let body = serde_json::to_string(&envelope).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("sealed envelope serialization failed: {e}"),
    })?;
    Ok(format!("{WIRE_PREFIX}{}", B64.encode(body)))
}

/// Open a sealed field with the private key. Server code never calls this in
/// production; it exists for client SDK parity and tests.
pub fn open_field(
    private_key: &RsaPrivateKey,
    stored: &str,
    aad: &[u8],
    entity_id: Uuid,
) -> Result<String, CryptoError> {
    let encoded = stored
        .strip_prefix(WIRE_PREFIX)
        .ok_or_else(|| CryptoError::MalformedCiphertext {
            reason: "missing sealed wire prefix".to_string(),
        })?;
    let body = B64.decode(encoded).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("sealed envelope is not valid base64: {e}"),
    })?;
    let envelope: SealedEnvelope =
        serde_json::from_slice(&body).map_err(|e| CryptoError::MalformedCiphertext {
            reason: format!("sealed envelope is not valid JSON: {e}"),
        })?;

    let wrapped_key = B64.decode(&envelope.ek).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("sealed key is not valid base64: {e}"),
    })?;
    let nonce_bytes = B64.decode(&envelope.n).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("sealed nonce is not valid base64: {e}"),
    })?;
    let ct = B64.decode(&envelope.ct).map_err(|e| CryptoError::MalformedCiphertext {
        reason: format!("sealed ciphertext is not valid base64: {e}"),
    })?;

    let ephemeral = Zeroizing::new(
        private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
            .map_err(|_| CryptoError::DecryptAuthFail { entity_id })?,
    );
    let cipher = Aes256Gcm::new_from_slice(&ephemeral).map_err(|_| {
        CryptoError::MalformedCiphertext {
            reason: "unwrapped ephemeral key has invalid length".to_string(),
        }
    })?;
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: &ct, aad },
        )
        .map_err(|_| CryptoError::DecryptAuthFail { entity_id })?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::MalformedCiphertext {
        reason: "sealed plaintext is not UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;

    fn test_keypair() -> (RsaPrivateKey, String) {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();
        (private, pem)
    }

    #[test]
    fn seal_then_open_round_trips() {
        let (private, pem) = test_keypair();
        let entity = Uuid::new_v4();
        let aad = crate::field_aad("tenant-a", entity);
        let sealed = seal_field(&pem, "for your eyes only", &aad).unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(
            open_field(&private, &sealed, &aad, entity).unwrap(),
            "for your eyes only"
        );
    }

    #[test]
    fn wrong_private_key_fails_auth() {
        let (_, pem) = test_keypair();
        let (other_private, _) = test_keypair();
        let entity = Uuid::new_v4();
        let aad = crate::field_aad("tenant-a", entity);
        let sealed = seal_field(&pem, "secret", &aad).unwrap();
        let err = open_field(&other_private, &sealed, &aad, entity).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptAuthFail { .. }));
    }

    #[test]
    fn aad_swap_fails_auth() {
        let (private, pem) = test_keypair();
        let entity = Uuid::new_v4();
        let sealed = seal_field(&pem, "secret", &crate::field_aad("tenant-a", entity)).unwrap();
        let err = open_field(
            &private,
            &sealed,
            &crate::field_aad("tenant-b", entity),
            entity,
        )
        .unwrap_err();
        assert!(matches!(err, CryptoError::DecryptAuthFail { .. }));
    }
}
