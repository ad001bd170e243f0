//! Wiretap CLI
//!
//! Thin entry point: parses flags, loads config, starts the proxy.

use std::path::PathBuf;

use clap::Parser;
use wiretap_config::Config;
use wiretap_observability::{init_tracing, LogFormat, TracingConfig};

#[derive(Parser)]
#[command(name = "wiretap")]
#[command(about = "LLM request logging reverse proxy", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Missing is not an error; defaults apply.
    #[arg(long, env = "WIRETAP_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `listen` from the config file / `WIRETAP_LISTEN`.
    #[arg(long)]
    listen: Option<String>,

    /// Overrides `log_dir` from the config file / `WIRETAP_LOG_DIR`.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Emits logs as JSON instead of the default human-readable format.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = log_dir;
    }

    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    let tracing_config = TracingConfig::from_env(TracingConfig { level: tracing::Level::INFO, format });
    init_tracing(tracing_config).expect("tracing subscriber already installed");

    wiretap_server::run(config).await
}
