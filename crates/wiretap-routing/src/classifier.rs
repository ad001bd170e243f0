//! Conversation-path classifier: logging and pattern tracking run only on
//! paths that represent conversations; everything else passes through
//! silently, following the common intercepted/bypass split used by
//! logging proxies to keep health checks and static assets off the hot
//! path.

use once_cell::sync::Lazy;
use regex::Regex;

const EXACT_PATHS: &[&str] = &[
    "/v1/messages",
    "/v1/chat/completions",
    "/v1/completions",
    "/v1/responses",
];

static THREAD_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/v1/threads/[^/]+/(messages|runs(/.*)?)$").unwrap()
});

static BACKEND_RESPONSES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/backend-api/.*/responses$").unwrap());

/// Whether `path` should be logged and pattern-tracked.
pub fn is_conversation_path(path: &str) -> bool {
    EXACT_PATHS.contains(&path) || THREAD_PATH.is_match(path) || BACKEND_RESPONSES.is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_conversation_paths_match() {
        for path in EXACT_PATHS {
            assert!(is_conversation_path(path), "{path} should match");
        }
    }

    #[test]
    fn thread_message_and_run_paths_match() {
        assert!(is_conversation_path("/v1/threads/thread_abc/messages"));
        assert!(is_conversation_path("/v1/threads/thread_abc/runs"));
        assert!(is_conversation_path("/v1/threads/thread_abc/runs/run_123"));
    }

    #[test]
    fn backend_api_responses_match_any_depth() {
        assert!(is_conversation_path("/backend-api/codex/responses"));
        assert!(is_conversation_path("/backend-api/codex/v1/responses"));
    }

    #[test]
    fn unrelated_paths_do_not_match() {
        assert!(!is_conversation_path("/v1/embeddings"));
        assert!(!is_conversation_path("/v1/audio/transcriptions"));
        assert!(!is_conversation_path("/healthz"));
        assert!(!is_conversation_path("/v1/models"));
    }
}
