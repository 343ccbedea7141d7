//! REM Core - Entity Types
//!
//! Pure data structures with no I/O. All other crates depend on this.
//! This crate contains the entity model, the error taxonomy, configuration,
//! and the small pure functions (key normalisation, token estimation,
//! deterministic identifiers) that the store and the SQL layer must agree on.

mod config;
mod entities;
mod enums;
mod error;
mod identity;
mod keys;
mod tokens;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use keys::*;
pub use tokens::*;
