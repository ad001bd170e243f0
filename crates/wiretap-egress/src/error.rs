use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build HTTP client: {0}")]
    ClientConfig(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("invalid model id: {0}")]
    InvalidModelId(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("credential resolution failed: {0}")]
    Credentials(String),
}

pub type Result<T> = std::result::Result<T, Error>;
