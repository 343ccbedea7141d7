//! REM Worker - background runtime
//!
//! Claims tasks per tier, dispatches them to typed handlers, and finishes
//! every claim with complete or fail. Handler errors never escape the loop;
//! over-quota tasks are skipped, not failed. The embedding worker drains the
//! trigger-fed queue alongside.

mod blob;
mod embedding_worker;
pub mod handlers;
mod runtime;

pub use blob::*;
pub use embedding_worker::*;
pub use runtime::*;
