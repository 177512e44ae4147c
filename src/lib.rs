//! Berth - Compose-managed container environments for integration tests
//!
//! Berth brings a Docker Compose project up, waits until every published
//! TCP endpoint accepts connections, and hands back per-container metadata
//! (host, container hostname, published ports) under stable names suitable
//! for environment variables or JVM-style system properties. It supports:
//!
//! - Compose plugin (`docker compose`) and standalone (`docker-compose`) binaries
//! - Scaled services with deterministic per-replica naming
//! - Custom container names passed through verbatim
//! - Bridge and host network modes
//! - Health-check aware readiness waiting
//! - Idempotent bring-up keyed on a configuration fingerprint

pub mod engine;
pub mod error;
pub mod expose;
pub mod manifest;
pub mod network;
pub mod orchestrator;
pub mod readiness;
pub mod state;

pub use error::{BerthError, Result};
