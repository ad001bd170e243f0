//! Shared test scaffolding: builds a real `wiretap-server` router backed by
//! a temporary log directory, so scenario tests drive the proxy exactly as
//! a client would, over HTTP, against a `wiremock` upstream.

use std::sync::Arc;

use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use axum::Router;
use tempfile::TempDir;
use wiretap_config::Config;
use wiretap_observability::{FileLogger, FileWriter, ProxyLogger};
use wiretap_server::state::AppState;
use wiretap_session::SessionIndex;

#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub log_dir: TempDir,
    pub logger: Arc<dyn ProxyLogger>,
}

impl TestApp {
    /// Flushes every cached log-file handle. `FileWriter` only flushes on
    /// close or cache eviction, so tests must call this before reading back
    /// the JSONL files they just produced.
    #[allow(dead_code)]
    pub async fn flush_logs(&self) {
        self.logger.close().await.unwrap();
    }
}

fn test_credentials() -> SharedCredentialsProvider {
    SharedCredentialsProvider::new(Credentials::new("test-access-key", "test-secret-key", None, None, "wiretap-test"))
}

#[allow(dead_code)]
pub async fn build_app() -> TestApp {
    let log_dir = TempDir::new().unwrap();
    let config = Config { log_dir: log_dir.path().to_path_buf(), ..Config::default() };
    build_app_with_config(log_dir, config).await
}

/// Like [`build_app`], but lets a test override fields such as
/// `bedrock.endpoint_override` that point the router at a mock server
/// instead of the real AWS endpoint.
#[allow(dead_code)]
pub async fn build_app_with_config(log_dir: TempDir, config: Config) -> TestApp {
    let config = Arc::new(config);

    let session_index = Arc::new(SessionIndex::open(&config.log_dir).await.unwrap());
    let logger: Arc<dyn ProxyLogger> = Arc::new(FileLogger::new(FileWriter::new(config.log_dir.clone())));
    let client = wiretap_egress::create_client(&wiretap_egress::HttpClientConfig::default()).unwrap();

    let state = AppState::new(config, session_index, logger.clone(), client, test_credentials());
    let router = wiretap_server::routes::build(state, None);

    TestApp { router, log_dir, logger }
}

#[allow(dead_code)]
pub fn session_log_dir(app: &TestApp, upstream: &str) -> std::path::PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    app.log_dir.path().join(upstream).join(today)
}
