//! Process wiring: builds every collaborator (`SessionIndex`, logger,
//! forwarding client, Bedrock credentials, router) from a `Config` and serves
//! it.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use wiretap_config::Config;
use wiretap_egress::{create_client, HttpClientConfig};
use wiretap_observability::{FanoutWriter, FileLogger, FileWriter, ProxyLogger, RemoteSink, SinkConfig};
use wiretap_session::SessionIndex;

/// Builds the logger: a `FileLogger` alone, or fanned out to a `RemoteSink`
/// when `config.sink.url` is set. Returns the sink's stats handle and the
/// `RemoteSink` itself (kept alive by the caller until shutdown) alongside it.
fn build_logger(
    config: &Config,
    forwarding_client: reqwest::Client,
) -> (Arc<dyn ProxyLogger>, Option<Arc<wiretap_observability::SinkStats>>, Option<RemoteSink>) {
    let file = FileLogger::new(FileWriter::new(config.log_dir.clone()));

    let Some(url) = config.sink.url.clone() else {
        return (Arc::new(file), None, None);
    };

    let sink_config = SinkConfig {
        url,
        token: config.sink.token.clone(),
        batch_size: config.sink.batch_size,
        batch_wait: std::time::Duration::from_secs(config.sink.batch_wait_secs),
        retry_max: config.sink.retry_max,
        compress: config.sink.compress,
        ..Default::default()
    };
    let sink = RemoteSink::start(sink_config, forwarding_client);
    let stats = sink.stats();
    let handle = sink.handle();

    let environment = std::env::var("WIRETAP_ENVIRONMENT").unwrap_or_else(|_| "production".to_string());
    (Arc::new(FanoutWriter::new(file, Some(handle), environment)), Some(stats), Some(sink))
}

/// Wires every collaborator and serves until the process is terminated.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if let Some(identity) = &config.machine_identity {
        wiretap_core::identity::set_machine_identity(identity.clone());
    }

    let session_index = Arc::new(SessionIndex::open(&config.log_dir).await?);

    let forwarding_client = create_client(&HttpClientConfig::default())?;
    let (logger, sink_stats, sink) = build_logger(&config, forwarding_client.clone());

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.bedrock.region.clone()))
        .load()
        .await;
    let bedrock_credentials: SharedCredentialsProvider = aws_config
        .credentials_provider()
        .ok_or_else(|| anyhow::anyhow!("no AWS credentials provider resolved for bedrock region {}", config.bedrock.region))?;

    let config = Arc::new(config);
    let listen = config.listen.clone();
    let state = AppState::new(Arc::clone(&config), session_index, logger.clone(), forwarding_client, bedrock_credentials);

    let app = routes::build(state, sink_stats);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "wiretap listening");
    axum::serve(listener, app).await?;

    // Flush the sink before closing the file writer, so a crash between the
    // two loses at most the file write, not an unflushed remote batch.
    if let Some(sink) = sink {
        sink.close().await;
    }
    logger.close().await?;
    Ok(())
}
