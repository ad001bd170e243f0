//! Shared application state handed to every Axum handler.

use std::sync::Arc;

use aws_credential_types::provider::SharedCredentialsProvider;
use tokio::sync::Semaphore;
use wiretap_config::Config;
use wiretap_observability::ProxyLogger;
use wiretap_session::SessionIndex;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session_index: Arc<SessionIndex>,
    pub logger: Arc<dyn ProxyLogger>,
    pub client: reqwest::Client,
    pub bedrock_gate: Arc<Semaphore>,
    pub bedrock_credentials: SharedCredentialsProvider,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        session_index: Arc<SessionIndex>,
        logger: Arc<dyn ProxyLogger>,
        client: reqwest::Client,
        bedrock_credentials: SharedCredentialsProvider,
    ) -> Self {
        let bedrock_gate = Arc::new(Semaphore::new(config.bedrock.concurrency));
        Self { config, session_index, logger, client, bedrock_gate, bedrock_credentials }
    }
}
