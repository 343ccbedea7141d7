//! REM Queue - background work
//!
//! A single `task_queue` table carries all background work, partitioned into
//! four tiers. Claims take row locks with skip-locked semantics so parallel
//! workers never contend; failures reschedule with exponential backoff; a
//! recovery pass reclaims stale claims. Periodic enqueuers produce the
//! dreaming/news/reading-summary jobs, bounded by per-plan quotas.

mod queue;
mod scheduler;
mod usage;

pub use queue::*;
pub use scheduler::*;
pub use usage::*;
