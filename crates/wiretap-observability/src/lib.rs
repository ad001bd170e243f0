//! Logging, fan-out, and health-reporting for the proxy.
//!
//! - [`logger`]: the `ProxyLogger` trait every log-producing call site uses,
//!   and its file-backed implementation.
//! - [`writer`]: the LRU-cached JSONL file writer.
//! - [`fanout`]: composes the file writer with an optional remote-sink push.
//! - [`sink`]: the bounded, batching, retrying remote-sink exporter.
//! - [`obfuscate`]: header value masking.
//! - [`health`]: `/health` and `/health/<subsystem>` endpoints.
//! - [`tracing_init`]: process-wide `tracing` subscriber setup.

pub mod error;
pub mod fanout;
pub mod health;
pub mod logger;
pub mod obfuscate;
pub mod sink;
pub mod tracing_init;
pub mod writer;

pub use error::{Error, Result};
pub use fanout::FanoutWriter;
pub use health::{health_router, HealthState};
pub use logger::{FileLogger, ProxyLogger};
pub use sink::{Labels, RemoteSink, SinkConfig, SinkEntry, SinkHandle, SinkStats};
pub use tracing_init::{init as init_tracing, LogFormat, TracingConfig};
pub use writer::{FileWriter, FileWriterConfig};
