//! End-to-end integration tests for the wiretap proxy.
//!
//! Scenario tests live under `tests/`; this crate has no runtime surface of
//! its own.
