//! Process-lifetime machine identity embedded in every log record's metadata.
//!
//! Computed once at startup and never mutated afterwards -- treat it as
//! configuration, not state (see the "Global state" design note).

use once_cell::sync::OnceCell;

static MACHINE_IDENTITY: OnceCell<String> = OnceCell::new();

/// Returns the `user@host` identity for this process, computing it on first use.
pub fn machine_identity() -> &'static str {
    MACHINE_IDENTITY.get_or_init(compute_machine_identity)
}

/// Overrides the machine identity (used by the config collaborator and tests).
/// Has no effect if the identity was already read.
pub fn set_machine_identity(value: String) {
    let _ = MACHINE_IDENTITY.set(value);
}

fn compute_machine_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname().unwrap_or_else(|| "unknown".to_string());
    format!("{user}@{host}")
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| {
        let output = std::process::Command::new("hostname").output().ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    })
}
