//! Outbound transports: the direct forwarding HTTP client, the SSE tee used
//! for streaming passthrough, and the AWS Bedrock cloud-transport adapter.

pub mod bedrock;
pub mod client;
pub mod error;
pub mod sse;

pub use client::{create_client, HttpClientConfig};
pub use error::{Error, Result};
