//! Per-session pattern state and the pure `compute_patterns` transition.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::record::PatternSnapshot;

/// Per-session counters used to derive `turn_start`/`turn_end` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternState {
    pub turn_count: u64,
    pub last_tool_name: Option<String>,
    pub tool_streak: u64,
    pub retry_count: u64,
    pub session_tool_count: u64,
    pub last_was_error: bool,
    /// tool-use-id -> tool-name, inserted on tool_use, removed on matching tool_result.
    pub pending_tool_ids: HashMap<String, String>,
}

impl PatternState {
    pub fn snapshot(&self) -> PatternSnapshot {
        PatternSnapshot {
            turn_count: self.turn_count,
            last_tool_name: self.last_tool_name.clone(),
            tool_streak: self.tool_streak,
            retry_count: self.retry_count,
            session_tool_count: self.session_tool_count,
        }
    }
}

/// Applies the response-side transition of 4.4 step 3 to `state`, given the
/// name of the first `tool_use` block in the response (if any). Returns
/// `is_retry`. Pure modulo the `&mut` on `state`: depends only on
/// `(state.last_tool_name, state.last_was_error, first_tool)`.
pub fn compute_patterns(state: &mut PatternState, first_tool: Option<&str>) -> bool {
    match first_tool {
        None => {
            state.tool_streak = 0;
            state.retry_count = 0;
            false
        }
        Some(tool) if state.last_tool_name.as_deref() == Some(tool) => {
            state.tool_streak += 1;
            if state.last_was_error {
                state.retry_count += 1;
                true
            } else {
                false
            }
        }
        Some(tool) => {
            state.last_tool_name = Some(tool.to_string());
            state.tool_streak = 1;
            state.retry_count = 0;
            false
        }
    }
}
