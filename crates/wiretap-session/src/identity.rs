//! Provider-specific client-supplied session id extraction.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use wiretap_core::Provider;

static VALID_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,255}$").unwrap());

fn validate(candidate: &str) -> Option<String> {
    if VALID_ID.is_match(candidate) {
        Some(candidate.to_string())
    } else {
        None
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Tries every provider-specific candidate, in spec order, returning the
/// first one that is present and passes validation.
pub fn resolve_client_session_id(
    provider: Provider,
    body: &Value,
    headers: &HashMap<String, String>,
    path_thread_id: Option<&str>,
) -> Option<String> {
    match provider {
        Provider::Anthropic => anthropic_session_id(body),
        Provider::Openai => openai_session_id(body, headers, path_thread_id),
    }
}

fn anthropic_session_id(body: &Value) -> Option<String> {
    let user_id = body.get("metadata")?.get("user_id")?.as_str()?;
    let marker = "_session_";
    let idx = user_id.rfind(marker)?;
    let candidate = &user_id[idx + marker.len()..];
    validate(candidate)
}

fn openai_session_id(
    body: &Value,
    headers: &HashMap<String, String>,
    path_thread_id: Option<&str>,
) -> Option<String> {
    if let Some(id) = path_thread_id {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    if let Some(conversation) = body.get("conversation") {
        let candidate = conversation
            .as_str()
            .map(str::to_string)
            .or_else(|| conversation.get("id")?.as_str().map(str::to_string));
        if let Some(c) = candidate.as_deref().and_then(validate) {
            return Some(c);
        }
    }

    if let Some(id) = body.get("previous_response_id").and_then(Value::as_str) {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    if let Some(id) = body
        .get("metadata")
        .and_then(|m| m.get("session_id"))
        .and_then(Value::as_str)
    {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    if let Some(id) = header(headers, "x-session-id") {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    if let Some(id) = header(headers, "x-client-request-id") {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    if let Some(id) = body.get("user").and_then(Value::as_str) {
        if let Some(valid) = validate(id) {
            return Some(valid);
        }
    }

    None
}
