//! REM Crypto - KMS adapter and envelope encryption
//!
//! Per-tenant DEKs wrapped by a KMS master key, AEAD field encryption with
//! AAD binding, per-record mode tagging, and the multi-mode decryption
//! policy. Plaintext key material lives only in the bounded in-process cache
//! and is zeroized on eviction.

mod aead;
mod dek;
pub mod kms;
mod sealed;
mod service;

pub use aead::*;
pub use dek::*;
pub use kms::{KmsBackend, LocalKms, VaultTransitKms};
pub use sealed::*;
pub use service::*;
