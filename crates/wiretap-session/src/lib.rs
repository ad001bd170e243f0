//! Session identity, continuation/fork detection, and pattern tracking.
//!
//! Resolves each request to a session (new, continuing, or forked from an
//! earlier point in another session's history), persists that mapping to
//! disk, and turns raw request/response pairs into the derived pattern
//! records (`turn_start`, `turn_end`, `tool_call`, `tool_result`).

pub mod identity;
pub mod index;
pub mod store;
pub mod tracker;

pub use index::{Resolution, SessionIndex};
