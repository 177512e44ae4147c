//! Networking modes and reachable-address resolution

use crate::engine::DaemonInfo;
use crate::error::{BerthError, Result};
use crate::state::PortSpec;
use serde::Serialize;
use std::collections::BTreeMap;

/// Container networking mode
///
/// The closed set of modes connection metadata can be derived for. Named
/// compose networks behave like the default bridge; anything else is
/// carried as `Unsupported` and rejected at extraction time instead of
/// producing a silently wrong address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Engine-managed network with published port bindings
    Bridge,
    /// Container shares the daemon host's network namespace
    Host,
    /// A mode no reachable address can be derived for
    Unsupported(String),
}

impl NetworkMode {
    /// Classify the engine's `HostConfig.NetworkMode` string
    pub fn parse(raw: &str) -> Self {
        match raw {
            "host" => NetworkMode::Host,
            "" | "default" | "bridge" => NetworkMode::Bridge,
            "none" => NetworkMode::Unsupported("none".to_string()),
            other if other.starts_with("container:") => {
                NetworkMode::Unsupported(other.to_string())
            }
            // user-defined and compose-generated networks publish ports
            // like the default bridge
            _ => NetworkMode::Bridge,
        }
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkMode::Bridge => write!(f, "bridge"),
            NetworkMode::Host => write!(f, "host"),
            NetworkMode::Unsupported(raw) => write!(f, "{}", raw),
        }
    }
}

/// Resolves the externally reachable side of a container's network config
pub struct NetworkInfoExtractor {
    daemon: DaemonInfo,
}

impl NetworkInfoExtractor {
    /// Create an extractor for the given daemon location
    pub fn new(daemon: DaemonInfo) -> Self {
        Self { daemon }
    }

    /// Reachable host plus the authoritative container-to-host port map
    ///
    /// Bridge containers are reachable on the daemon address through their
    /// published bindings. Host-networked containers expose their declared
    /// ports identically on `localhost`, which only holds when the daemon
    /// runs on this machine; a remote daemon is rejected outright.
    pub fn resolve(
        &self,
        mode: &NetworkMode,
        published: &BTreeMap<PortSpec, u16>,
        declared: &[PortSpec],
    ) -> Result<(String, BTreeMap<PortSpec, u16>)> {
        match mode {
            NetworkMode::Bridge => Ok((self.daemon.host.clone(), published.clone())),
            NetworkMode::Host if self.daemon.local => {
                let ports = declared.iter().map(|spec| (*spec, spec.port)).collect();
                Ok(("localhost".to_string(), ports))
            }
            NetworkMode::Host => Err(BerthError::UnsupportedNetworkMode(format!(
                "host networking requires a local daemon, but the daemon runs on {}",
                self.daemon.host
            ))),
            NetworkMode::Unsupported(raw) => Err(BerthError::UnsupportedNetworkMode(raw.clone())),
        }
    }
}
