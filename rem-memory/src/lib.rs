//! REM Memory - the session pipeline
//!
//! Turn persistence with token accounting, token-budgeted context loading
//! with moment breadcrumbs, history compaction into `session_chunk` moments,
//! virtual daily summaries, and the future-moment (reminder) policy.

mod context;
mod moments;
mod service;

pub use context::*;
pub use moments::*;
pub use service::*;
