//! Durable, atomically-rewritten store for sessions and the fingerprint map.
//!
//! "Database" here names a row store, not a SQL engine: a single JSON
//! document at `{log_dir}/sessions.db`, rewritten write-to-temp-then-rename
//! on every mutation, following the atomic-writer discipline used
//! elsewhere in this codebase for small, infrequently-written index files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use wiretap_core::{Error, Result, Session};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub sessions: HashMap<String, Session>,
    /// fingerprint -> (session_id, seq) for every posterior fingerprint ever recorded.
    pub fingerprints: HashMap<String, (String, u64)>,
}

pub fn load(path: &Path) -> Result<PersistedState> {
    if !path.exists() {
        return Ok(PersistedState::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(PersistedState::default());
    }
    serde_json::from_str(&contents)
        .map_err(|e| Error::SessionStore(format!("corrupt sessions.db: {e}")))
}

pub fn persist(path: &Path, state: &PersistedState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(state)?;

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let mut file = File::create(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiretap_core::Provider;

    #[test]
    fn round_trips_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.db");

        let mut state = PersistedState::default();
        let session = Session::new(
            Provider::Anthropic,
            "api.anthropic.com",
            dir.path().join("log.jsonl"),
            None,
        );
        let id = session.id.clone();
        state.sessions.insert(id.clone(), session);
        state.fingerprints.insert("abc123".into(), (id.clone(), 1));

        persist(&path, &state).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.sessions.len(), 1);
        assert!(loaded.sessions.contains_key(&id));
        assert_eq!(loaded.fingerprints.get("abc123").unwrap().1, 1);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.db");
        let state = load(&path).unwrap();
        assert!(state.sessions.is_empty());
    }
}
