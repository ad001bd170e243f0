//! The session row held by the session index.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pattern::PatternState;
use crate::provider::Provider;

/// Generates an opaque session id: `YYYYMMDD-hhmmss-<4-hex>` UTC.
pub fn new_session_id() -> String {
    let now = Utc::now();
    let mut rng = rand::rng();
    let suffix: u16 = rng.random();
    format!("{}-{:04x}", now.format("%Y%m%d-%H%M%S"), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider: Provider,
    pub upstream_host: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_seq: u64,
    pub last_fingerprint: Option<String>,
    pub client_session_id: Option<String>,
    pub log_path: PathBuf,
    #[serde(default)]
    pub pattern: PatternState,
}

impl Session {
    pub fn new(
        provider: Provider,
        upstream_host: impl Into<String>,
        log_path: PathBuf,
        client_session_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_session_id(),
            provider,
            upstream_host: upstream_host.into(),
            created_at: now,
            last_activity: now,
            last_seq: 0,
            last_fingerprint: None,
            client_session_id,
            log_path,
            pattern: PatternState::default(),
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.last_seq += 1;
        self.last_activity = Utc::now();
        self.last_seq
    }
}
