//! URL surface parsing and the auth-type rewrite.
//!
//! Proxy URL shape: `/{provider}/{upstream_host}/{remaining_path}`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

use wiretap_core::Provider;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("missing upstream host")]
    MissingUpstream,
    #[error("malformed proxy path")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRoute {
    pub provider: Provider,
    pub upstream: String,
    /// Remaining path, leading slash included (e.g. `/v1/messages`).
    pub path: String,
}

/// Splits `/{provider}/{upstream_host}/{remaining_path}` into its parts.
/// `remaining_path` may be empty, in which case `path` is `/`.
pub fn parse(raw_path: &str) -> Result<ParsedRoute, RouteError> {
    let trimmed = raw_path.strip_prefix('/').unwrap_or(raw_path);
    let mut parts = trimmed.splitn(3, '/');

    let provider_segment = parts.next().filter(|s| !s.is_empty()).ok_or(RouteError::Malformed)?;
    let provider: Provider = provider_segment.parse().map_err(|_| RouteError::UnknownProvider(provider_segment.to_string()))?;

    let upstream = parts.next().filter(|s| !s.is_empty()).ok_or(RouteError::MissingUpstream)?;

    let remaining = parts.next().unwrap_or("");
    let path = if remaining.is_empty() {
        "/".to_string()
    } else {
        format!("/{remaining}")
    };

    Ok(ParsedRoute {
        provider,
        upstream: upstream.to_string(),
        path,
    })
}

/// `http` for local test upstreams, `https` otherwise.
pub fn scheme_for(upstream: &str) -> &'static str {
    if upstream.starts_with("127.0.0.1") || upstream.starts_with("localhost") {
        "http"
    } else {
        "https"
    }
}

static JWT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$").unwrap()
});

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
}

/// Codex's web-token auth carries a three-part dot-separated base64 bearer
/// token that is not an `sk-`-prefixed API key; such requests are rewritten
/// to `chatgpt.com` with `/backend-api/codex` prepended to the path.
pub fn apply_auth_rewrite(route: ParsedRoute, headers: &HashMap<String, String>) -> ParsedRoute {
    if route.provider != Provider::Openai || route.upstream != "api.openai.com" {
        return route;
    }

    let Some(auth) = header(headers, "authorization") else {
        return route;
    };
    let Some(token) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) else {
        return route;
    };

    if token.starts_with("sk-") || !JWT_SHAPE.is_match(token) {
        return route;
    }

    ParsedRoute {
        provider: route.provider,
        upstream: "chatgpt.com".to_string(),
        path: format!("/backend-api/codex{}", route.path),
    }
}
