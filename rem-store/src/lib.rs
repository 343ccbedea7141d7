//! REM Store - Postgres entity store and indices
//!
//! The only persistent substrate. Four ordered idempotent installer scripts
//! create the entity tables, the registry, the KV index with its triggers,
//! the task queue, and the billing tables. Service code reaches Postgres
//! through the `rem_*` SQL functions installed by script 2, passing and
//! receiving JSONB.

mod db;
mod embeddings;
mod entity;
mod installer;
mod keystore;
mod kv;
mod redaction;
mod registry;
pub mod rows;

pub use db::*;
pub use embeddings::*;
pub use entity::*;
pub use installer::*;
pub use keystore::*;
pub use kv::*;
pub use redaction::*;
pub use registry::*;
