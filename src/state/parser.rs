//! Container inspection parsing

use super::{ContainerInfo, HealthState, PortSpec};
use crate::error::{BerthError, Result};
use crate::network::{NetworkInfoExtractor, NetworkMode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Compose label carrying the owning service name
pub const SERVICE_LABEL: &str = "com.docker.compose.service";
/// Compose label carrying the engine's 1-based instance number
pub const CONTAINER_NUMBER_LABEL: &str = "com.docker.compose.container-number";

/// One inspection record reduced to grouping metadata plus connection info
#[derive(Debug, Clone)]
pub struct ParsedContainer {
    /// Service the container belongs to
    pub service: String,
    /// Container name without the leading slash
    pub name: String,
    /// Engine instance number when labeled
    pub number: Option<u32>,
    /// Creation timestamp for ordering fallback
    pub created: Option<DateTime<Utc>>,
    /// Health state at inspection time
    pub health: HealthState,
    /// Fully resolved connection metadata
    pub info: ContainerInfo,
}

/// Turns raw inspection records into resolved [`ContainerInfo`] values
pub struct ContainerInfoParser {
    extractor: NetworkInfoExtractor,
}

impl ContainerInfoParser {
    /// Create a parser resolving addresses through the given extractor
    pub fn new(extractor: NetworkInfoExtractor) -> Self {
        Self { extractor }
    }

    /// Parse one inspection record
    ///
    /// A missing required field is a [`BerthError::Parse`] the caller's
    /// bounded retry loop can re-inspect on. Network-mode problems are
    /// fatal and surface as [`BerthError::UnsupportedNetworkMode`].
    pub fn parse(&self, record: &Value) -> Result<ParsedContainer> {
        let id = required_str(record, "/Id")?;
        let name = required_str(record, "/Name")?
            .trim_start_matches('/')
            .to_string();
        let container_hostname = required_str(record, "/Config/Hostname")?;
        let service = label(record, SERVICE_LABEL).ok_or_else(|| {
            BerthError::Parse(format!(
                "container {} carries no {} label",
                id, SERVICE_LABEL
            ))
        })?;
        let number = label(record, CONTAINER_NUMBER_LABEL).and_then(|n| n.parse().ok());
        let created = record
            .pointer("/Created")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|created| created.with_timezone(&Utc));
        let health = HealthState::parse(
            record
                .pointer("/State/Health/Status")
                .and_then(Value::as_str),
        );

        let mode = NetworkMode::parse(
            record
                .pointer("/HostConfig/NetworkMode")
                .and_then(Value::as_str)
                .unwrap_or("default"),
        );
        let published = published_ports(record);
        let declared = declared_ports(record);
        let (host, ports) = self.extractor.resolve(&mode, &published, &declared)?;

        Ok(ParsedContainer {
            service,
            name,
            number,
            created,
            health,
            info: ContainerInfo::new(id, container_hostname, host, mode, ports, record.clone()),
        })
    }
}

fn required_str(record: &Value, pointer: &str) -> Result<String> {
    record
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            BerthError::Parse(format!("missing field {} in inspection record", pointer))
        })
}

fn label(record: &Value, name: &str) -> Option<String> {
    record
        .pointer(&format!("/Config/Labels/{}", name))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Published bindings from `NetworkSettings.Ports`
///
/// A null binding list means the port is exposed but unpublished; several
/// bindings per key happen when both IP stacks publish, and the first
/// parseable host port wins.
fn published_ports(record: &Value) -> BTreeMap<PortSpec, u16> {
    let mut ports = BTreeMap::new();
    if let Some(map) = record
        .pointer("/NetworkSettings/Ports")
        .and_then(Value::as_object)
    {
        for (key, bindings) in map {
            let spec = match PortSpec::parse(key) {
                Some(spec) => spec,
                None => continue,
            };
            let bindings = match bindings.as_array() {
                Some(bindings) => bindings,
                None => continue,
            };
            for binding in bindings {
                if let Some(host_port) = binding
                    .get("HostPort")
                    .and_then(Value::as_str)
                    .and_then(|port| port.parse::<u16>().ok())
                {
                    ports.insert(spec, host_port);
                    break;
                }
            }
        }
    }
    ports
}

/// Declared ports from `Config.ExposedPorts`
fn declared_ports(record: &Value) -> Vec<PortSpec> {
    record
        .pointer("/Config/ExposedPorts")
        .and_then(Value::as_object)
        .map(|map| map.keys().filter_map(|key| PortSpec::parse(key)).collect())
        .unwrap_or_default()
}
