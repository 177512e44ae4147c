//! Container engine boundary
//!
//! Orchestration talks to the compose tool exclusively through the
//! [`ComposeEngine`] trait. The production implementation drives the
//! `docker compose` CLI; tests substitute scripted engines.

pub mod cli;
pub mod version;

pub use cli::{ComposeCli, ComposeFlavor};
pub use version::EngineVersion;

use crate::error::Result;
use crate::manifest::ManifestConfig;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Location of the engine daemon relative to this process
///
/// Carried as an explicit precondition: host-networked containers are only
/// reachable as `localhost` when the daemon runs on this machine, and
/// callers on VM topologies must say so here rather than have it guessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonInfo {
    /// Address containers are reachable on in bridge mode
    pub host: String,
    /// Whether the daemon shares this machine's network
    pub local: bool,
}

impl DaemonInfo {
    /// A daemon running on this machine
    pub fn localhost() -> Self {
        Self {
            host: "localhost".to_string(),
            local: true,
        }
    }

    /// Derive from a `DOCKER_HOST`-style endpoint
    ///
    /// Socket endpoints mean a local daemon; `tcp://` and `ssh://`
    /// endpoints are local only when they point at a loopback address.
    pub fn from_endpoint(endpoint: Option<&str>) -> Self {
        let url = match endpoint {
            Some(url) if !url.trim().is_empty() => url.trim(),
            _ => return Self::localhost(),
        };
        if url.starts_with("unix://") || url.starts_with("npipe://") {
            return Self::localhost();
        }

        let rest = url.split("://").nth(1).unwrap_or(url);
        let rest = rest.rsplit('@').next().unwrap_or(rest);
        let host = if let Some(bracketed) = rest.strip_prefix('[') {
            bracketed.split(']').next().unwrap_or(bracketed).to_string()
        } else {
            rest.split(':').next().unwrap_or(rest).to_string()
        };
        if host.is_empty() {
            return Self::localhost();
        }

        let local = matches!(host.as_str(), "localhost" | "127.0.0.1" | "::1");
        Self { host, local }
    }
}

/// Boundary to the external compose tool and container engine
///
/// Implementations only execute the tool and hand back raw results; no
/// orchestration decisions happen behind this trait.
#[async_trait]
pub trait ComposeEngine: Send + Sync {
    /// Version of the compose tool
    async fn version(&self) -> Result<EngineVersion>;

    /// Pull images for every service in the manifest
    async fn pull(&self, manifest: &ManifestConfig) -> Result<()>;

    /// Create and start services, applying the manifest's scale map
    async fn up(&self, manifest: &ManifestConfig) -> Result<()>;

    /// Stop and remove the project's services and networks
    async fn down(&self, manifest: &ManifestConfig) -> Result<()>;

    /// Ids of every container belonging to the project
    async fn ps(&self, manifest: &ManifestConfig) -> Result<Vec<String>>;

    /// Raw inspection records for the given container ids
    async fn inspect(&self, ids: &[String]) -> Result<Vec<Value>>;

    /// Service names declared by the manifest
    async fn services(&self, manifest: &ManifestConfig) -> Result<Vec<String>>;

    /// Where the engine daemon runs
    fn daemon(&self) -> &DaemonInfo;
}
