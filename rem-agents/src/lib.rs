//! REM Agents - declarative agents for one turn
//!
//! An agent is a `schemas` row: its description is the system prompt, its
//! properties are thinking aides or output fields, its tools name remote
//! registrations. The adapter assembles the prompt, runs the model, enforces
//! structured output, executes tools (including `ask_agent` delegation), and
//! persists the turn.

mod prompt;
mod runtime;
mod schema;
mod tools;

pub use prompt::*;
pub use runtime::*;
pub use schema::*;
pub use tools::*;
