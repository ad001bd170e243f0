//! Forwarding HTTP client configuration: rustls TLS, disabled
//! auto-decompression for byte-exact passthrough, and pool/keepalive
//! tuning to avoid handing out a connection the upstream already closed.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applies to the entire request, streaming responses included, so it
    /// must be long enough to cover extended thinking / long tool loops.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
            user_agent: format!("wiretap/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Builds the client used for the direct forwarding path.
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Upstreams typically close idle connections after 60-120s; expire
        // ours first so the pool never hands back a dead connection.
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        .use_rustls_tls()
        .tcp_keepalive(Duration::from_secs(60))
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()
        .map_err(|e| Error::ClientConfig(e.to_string()))
}
