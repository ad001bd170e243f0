//! The session index: `get_or_create`, continuation, and fork detection.
//! All mutations are serialized by a single async mutex and
//! persisted to `sessions.db` before the lock is released, so every
//! observer sees a consistent, durable view.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use wiretap_core::{Error, Provider, Result, Session};
use wiretap_fingerprint::fingerprint_messages;

use crate::store::{self, PersistedState};

/// Outcome of resolving a request to a session.
#[derive(Debug, Clone)]
pub enum Resolution {
    New {
        session_id: String,
        seq: u64,
    },
    Continuation {
        session_id: String,
        seq: u64,
    },
    Fork {
        session_id: String,
        seq: u64,
        parent_session_id: String,
        parent_up_to_seq: u64,
    },
}

impl Resolution {
    pub fn session_id(&self) -> &str {
        match self {
            Resolution::New { session_id, .. }
            | Resolution::Continuation { session_id, .. }
            | Resolution::Fork { session_id, .. } => session_id,
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            Resolution::New { seq, .. }
            | Resolution::Continuation { seq, .. }
            | Resolution::Fork { seq, .. } => *seq,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Resolution::New { .. } | Resolution::Fork { .. })
    }
}

pub struct SessionIndex {
    log_dir: PathBuf,
    db_path: PathBuf,
    inner: Mutex<PersistedState>,
}

impl SessionIndex {
    pub async fn open(log_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.into();
        let db_path = log_dir.join("sessions.db");
        let state = store::load(&db_path)?;
        Ok(Self {
            log_dir,
            db_path,
            inner: Mutex::new(state),
        })
    }

    fn session_log_path(&self, upstream: &str, session_id: &str) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        self.log_dir.join(upstream).join(date).join(format!("{session_id}.jsonl"))
    }

    /// Resolves the session for one request. `client_session_id` is
    /// whichever provider-specific id `identity::resolve_client_session_id`
    /// found (if any); `prior_messages` is every message but the last, used
    /// for the fingerprint fallback when no client id is present.
    pub async fn get_or_create(
        &self,
        client_session_id: Option<String>,
        prior_messages: &[Value],
        provider: Provider,
        upstream: &str,
    ) -> Result<Resolution> {
        let mut state = self.inner.lock().await;

        let resolution = if let Some(client_id) = client_session_id {
            self.resolve_by_client_id(&mut state, client_id, provider, upstream)
        } else {
            self.resolve_by_fingerprint(&mut state, prior_messages, provider, upstream)
        };

        store::persist(&self.db_path, &state)?;
        Ok(resolution)
    }

    fn resolve_by_client_id(
        &self,
        state: &mut PersistedState,
        client_id: String,
        provider: Provider,
        upstream: &str,
    ) -> Resolution {
        if let Some(session_id) = state
            .sessions
            .values()
            .find(|s| s.client_session_id.as_deref() == Some(client_id.as_str()))
            .map(|s| s.id.clone())
        {
            let session = state.sessions.get_mut(&session_id).expect("found above");
            let seq = session.next_seq();
            return Resolution::Continuation { session_id, seq };
        }

        let log_path = self.session_log_path(upstream, "pending");
        let mut session = Session::new(provider, upstream, log_path, Some(client_id));
        session.log_path = self.session_log_path(upstream, &session.id);
        let session_id = session.id.clone();
        state.sessions.insert(session_id.clone(), session);
        Resolution::New { session_id, seq: 1 }
    }

    fn resolve_by_fingerprint(
        &self,
        state: &mut PersistedState,
        prior_messages: &[Value],
        provider: Provider,
        upstream: &str,
    ) -> Resolution {
        if prior_messages.is_empty() {
            return self.create_new(state, provider, upstream);
        }

        let prior_fp = fingerprint_messages(prior_messages);

        let Some((matched_session_id, matched_seq)) = state.fingerprints.get(&prior_fp).cloned()
        else {
            return self.create_new(state, provider, upstream);
        };

        let Some(matched_session) = state.sessions.get(&matched_session_id) else {
            return self.create_new(state, provider, upstream);
        };

        if matched_session.last_fingerprint.as_deref() == Some(prior_fp.as_str()) {
            let session = state.sessions.get_mut(&matched_session_id).expect("checked above");
            let seq = session.next_seq();
            return Resolution::Continuation { session_id: matched_session_id, seq };
        }

        // The match is an earlier state than the session's current head: fork.
        let mut forked = Session::new(provider, upstream, PathBuf::new(), None);
        forked.log_path = self.session_log_path(upstream, &forked.id);
        forked.last_fingerprint = Some(prior_fp);
        forked.last_seq = matched_seq;
        let forked_id = forked.id.clone();
        let seq = forked.next_seq();
        state.sessions.insert(forked_id.clone(), forked);

        Resolution::Fork {
            session_id: forked_id,
            seq,
            parent_session_id: matched_session_id,
            parent_up_to_seq: matched_seq,
        }
    }

    fn create_new(&self, state: &mut PersistedState, provider: Provider, upstream: &str) -> Resolution {
        let mut session = Session::new(provider, upstream, PathBuf::new(), None);
        session.log_path = self.session_log_path(upstream, &session.id);
        let session_id = session.id.clone();
        state.sessions.insert(session_id.clone(), session);
        Resolution::New { session_id, seq: 1 }
    }

    /// Records the posterior fingerprint (request messages + assistant reply)
    /// as the session's new latest state, keyed to the sequence number just
    /// written.
    pub async fn record_posterior(&self, session_id: &str, messages_with_reply: &[Value], seq: u64) -> Result<()> {
        let fingerprint = fingerprint_messages(messages_with_reply);
        let mut state = self.inner.lock().await;

        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionStore(format!("unknown session {session_id}")))?;
        session.last_fingerprint = Some(fingerprint.clone());

        state.fingerprints.insert(fingerprint, (session_id.to_string(), seq));
        store::persist(&self.db_path, &state)?;
        Ok(())
    }

    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    pub async fn update_pattern(
        &self,
        session_id: &str,
        pattern: wiretap_core::PatternState,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionStore(format!("unknown session {session_id}")))?;
        session.pattern = pattern;
        store::persist(&self.db_path, &state)?;
        Ok(())
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

// Avoids leaking the `HashMap` dependency into the public surface above.
#[allow(dead_code)]
fn _assert_sync(_: &HashMap<String, String>) {}
