//! The validated `Config` struct: TOML file (optional) merged with
//! `WIRETAP_*` environment overrides, via a `from_file`/`merge_env` split.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub sink: SinkSettings,

    #[serde(default)]
    pub bedrock: BedrockSettings,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_identity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_wait_secs")]
    pub batch_wait_secs: u64,

    #[serde(default)]
    pub compress: bool,

    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            batch_size: default_batch_size(),
            batch_wait_secs: default_batch_wait_secs(),
            compress: false,
            retry_max: default_retry_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockSettings {
    #[serde(default = "default_bedrock_region")]
    pub region: String,

    #[serde(default = "default_bedrock_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_bedrock_buffer_bytes")]
    pub buffer_bytes: usize,

    /// Overrides `https://bedrock-runtime.<region>.amazonaws.com` with a
    /// fixed base URL. Unset in production; lets tests point the signed
    /// request at a local mock instead of the real AWS endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_override: Option<String>,
}

impl Default for BedrockSettings {
    fn default() -> Self {
        Self {
            region: default_bedrock_region(),
            concurrency: default_bedrock_concurrency(),
            buffer_bytes: default_bedrock_buffer_bytes(),
            endpoint_override: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_dir: default_log_dir(),
            sink: SinkSettings::default(),
            bedrock: BedrockSettings::default(),
            machine_identity: None,
        }
    }
}

impl Config {
    /// Loads a TOML config file, then applies `WIRETAP_*` env overrides,
    /// then validates. Missing file is not an error — callers should check
    /// existence first if an explicit `--config` path is required.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.merge_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read { path: path.display().to_string(), source })?;
        toml::from_str(&contents).map_err(|source| Error::Parse { path: path.display().to_string(), source })
    }

    /// Merges `WIRETAP_*` environment variables; env values take precedence
    /// over file values.
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("WIRETAP_LISTEN") {
            self.listen = val;
        }
        if let Ok(val) = std::env::var("WIRETAP_LOG_DIR") {
            self.log_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_URL") {
            self.sink.url = Some(val);
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_TOKEN") {
            self.sink.token = Some(val);
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.sink.batch_size = n;
            }
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_BATCH_WAIT_SECS") {
            if let Ok(n) = val.parse() {
                self.sink.batch_wait_secs = n;
            }
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_COMPRESS") {
            if let Ok(b) = val.parse() {
                self.sink.compress = b;
            }
        }
        if let Ok(val) = std::env::var("WIRETAP_SINK_RETRY_MAX") {
            if let Ok(n) = val.parse() {
                self.sink.retry_max = n;
            }
        }
        if let Ok(val) = std::env::var("BEDROCK_REGION") {
            self.bedrock.region = val;
        }
        if let Ok(val) = std::env::var("WIRETAP_BEDROCK_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                self.bedrock.concurrency = n;
            }
        }
        if let Ok(val) = std::env::var("WIRETAP_BEDROCK_BUFFER_BYTES") {
            if let Ok(n) = val.parse() {
                self.bedrock.buffer_bytes = n;
            }
        }
        if let Ok(val) = std::env::var("WIRETAP_BEDROCK_ENDPOINT_OVERRIDE") {
            self.bedrock.endpoint_override = Some(val);
        }
        if let Ok(val) = std::env::var("WIRETAP_MACHINE_IDENTITY") {
            self.machine_identity = Some(val);
        }
    }

    /// Type/shape validation only — this crate does not interpret values
    /// beyond that.
    fn validate(&self) -> Result<()> {
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Invalid(format!("listen address '{}' is not a valid socket address", self.listen)));
        }
        if self.sink.batch_size == 0 {
            return Err(Error::Invalid("sink.batch_size must be > 0".to_string()));
        }
        if self.bedrock.concurrency == 0 {
            return Err(Error::Invalid("bedrock.concurrency must be > 0".to_string()));
        }
        if let Some(url) = &self.sink.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Invalid(format!("sink.url '{url}' must be http(s)")));
            }
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".wiretap/logs")
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_wait_secs() -> u64 {
    5
}

fn default_retry_max() -> u32 {
    5
}

fn default_bedrock_region() -> String {
    "us-east-1".to_string()
}

fn default_bedrock_concurrency() -> usize {
    5
}

fn default_bedrock_buffer_bytes() -> usize {
    4 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_listen_address() {
        let mut config = Config::default();
        config.listen = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_sink_url() {
        let mut config = Config::default();
        config.sink.url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_file_and_applies_defaults_for_missing_fields() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "listen = \"0.0.0.0:9090\"\n").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:9090");
        assert_eq!(config.sink.batch_size, 100);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "listen = \"0.0.0.0:9090\"\n").unwrap();

        std::env::set_var("WIRETAP_LISTEN", "127.0.0.1:7000");
        let config = Config::load(Some(file.path())).unwrap();
        std::env::remove_var("WIRETAP_LISTEN");

        assert_eq!(config.listen, "127.0.0.1:7000");
    }
}
