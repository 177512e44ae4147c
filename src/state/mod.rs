//! Resolved service and container state
//!
//! The types here are snapshots: built once per successful bring-up,
//! shared immutably, and replaced wholesale when the environment changes.

pub mod parser;
pub mod resolver;

pub use parser::{ContainerInfoParser, ParsedContainer};
pub use resolver::{Resolution, ServiceStateResolver};

use crate::network::NetworkMode;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Network protocol of an exposed port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Parse the protocol half of an engine port key
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "sctp" => Some(Protocol::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// One exposed container port
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    /// A TCP port
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    /// A UDP port
    pub fn udp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Udp,
        }
    }

    /// Parse an engine port key such as `80/tcp`
    pub fn parse(key: &str) -> Option<Self> {
        let (port, protocol) = key.split_once('/')?;
        Some(Self {
            port: port.parse().ok()?,
            protocol: Protocol::parse(protocol)?,
        })
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

// serialized in display form so port maps stay plain JSON objects
impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Engine health state at inspection time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// No healthcheck declared
    None,
    /// Healthcheck declared, verdict pending
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthState {
    /// Parse the engine's `State.Health.Status` value
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("starting") => HealthState::Starting,
            Some("healthy") => HealthState::Healthy,
            Some("unhealthy") => HealthState::Unhealthy,
            _ => HealthState::None,
        }
    }
}

/// Connection metadata for one running container
///
/// Every field is resolved at parse time; the struct never changes after
/// creation. `tcp_ports` is derived from `ports` in the constructor, so
/// the TCP view can never drift from the full map.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    /// Engine container id
    pub id: String,
    /// Hostname inside the container
    pub container_hostname: String,
    /// Externally reachable address
    pub host: String,
    /// Networking mode the metadata was derived under
    pub network_mode: NetworkMode,
    /// Container port to host port, every protocol
    pub ports: BTreeMap<PortSpec, u16>,
    /// TCP subset of `ports`, container port to host port
    pub tcp_ports: BTreeMap<u16, u16>,
    /// Raw inspection payload for diagnostics
    #[serde(skip)]
    pub inspection: Value,
}

impl ContainerInfo {
    /// Build from resolved parts, deriving the TCP view
    pub fn new(
        id: String,
        container_hostname: String,
        host: String,
        network_mode: NetworkMode,
        ports: BTreeMap<PortSpec, u16>,
        inspection: Value,
    ) -> Self {
        let tcp_ports = ports
            .iter()
            .filter(|(spec, _)| spec.protocol == Protocol::Tcp)
            .map(|(spec, host_port)| (spec.port, *host_port))
            .collect();
        Self {
            id,
            container_hostname,
            host,
            network_mode,
            ports,
            tcp_ports,
            inspection,
        }
    }

    /// Host port published for a container TCP port
    pub fn tcp_port(&self, container_port: u16) -> Option<u16> {
        self.tcp_ports.get(&container_port).copied()
    }

    /// First 12 characters of the id, or the whole id when shorter
    pub fn short_id(&self) -> &str {
        self.id.get(..12).unwrap_or(&self.id)
    }
}

/// All running containers of one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    /// Service name from the manifest
    pub name: String,
    /// Containers keyed `{service}_{index}`; custom names kept verbatim
    pub containers: BTreeMap<String, ContainerInfo>,
}

impl ServiceInfo {
    /// An empty service entry
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            containers: BTreeMap::new(),
        }
    }

    /// Container under the given key
    ///
    /// The bare service name resolves to the first instance, so singleton
    /// services stay addressable without their `_1` suffix.
    pub fn container(&self, key: &str) -> Option<&ContainerInfo> {
        self.containers.get(key).or_else(|| {
            if key == self.name {
                self.first()
            } else {
                None
            }
        })
    }

    /// First instance in numeric key order
    pub fn first(&self) -> Option<&ContainerInfo> {
        self.ordered().into_iter().next().map(|(_, info)| info)
    }

    /// Entries ordered numerically by instance suffix (`web_2` before `web_10`)
    pub fn ordered(&self) -> Vec<(&String, &ContainerInfo)> {
        let mut entries: Vec<_> = self.containers.iter().collect();
        entries.sort_by(|(a, _), (b, _)| compare_instance_keys(a, b));
        entries
    }

    /// Number of running instances
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether the service has no resolved containers
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// Snapshot of every resolved service
///
/// Built fresh on each successful bring-up and swapped atomically behind
/// an `Arc`; never mutated in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServicesInfo {
    #[serde(flatten)]
    services: BTreeMap<String, ServiceInfo>,
}

impl ServicesInfo {
    /// Wrap a resolved service map
    pub fn new(services: BTreeMap<String, ServiceInfo>) -> Self {
        Self { services }
    }

    /// Service entry by name
    pub fn service(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.get(name)
    }

    /// All services in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServiceInfo)> {
        self.services.iter()
    }

    /// Number of services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services were resolved
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Every resolved container across all services, in stable order
    pub fn containers(&self) -> Vec<(&String, &String, &ContainerInfo)> {
        let mut all = Vec::new();
        for (service, info) in &self.services {
            for (key, container) in info.ordered() {
                all.push((service, key, container));
            }
        }
        all
    }
}

/// Order instance keys by shared base and numeric suffix, then lexically
fn compare_instance_keys(a: &str, b: &str) -> Ordering {
    match (split_instance_key(a), split_instance_key(b)) {
        ((base_a, Some(index_a)), (base_b, Some(index_b))) if base_a == base_b => {
            index_a.cmp(&index_b)
        }
        _ => a.cmp(b),
    }
}

fn split_instance_key(key: &str) -> (&str, Option<u32>) {
    match key.rsplit_once('_') {
        Some((base, suffix)) => match suffix.parse() {
            Ok(index) => (base, Some(index)),
            Err(_) => (key, None),
        },
        None => (key, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, tcp: &[(u16, u16)]) -> ContainerInfo {
        let ports = tcp
            .iter()
            .map(|(container_port, host_port)| (PortSpec::tcp(*container_port), *host_port))
            .collect();
        ContainerInfo::new(
            id.to_string(),
            format!("{}-hostname", id),
            "localhost".to_string(),
            NetworkMode::Bridge,
            ports,
            Value::Null,
        )
    }

    #[test]
    fn test_port_spec_parse() {
        assert_eq!(PortSpec::parse("80/tcp"), Some(PortSpec::tcp(80)));
        assert_eq!(PortSpec::parse("53/udp"), Some(PortSpec::udp(53)));
        assert_eq!(
            PortSpec::parse("132/sctp"),
            Some(PortSpec {
                port: 132,
                protocol: Protocol::Sctp
            })
        );
        assert_eq!(PortSpec::parse("80"), None);
        assert_eq!(PortSpec::parse("80/quic"), None);
        assert_eq!(PortSpec::parse("notaport/tcp"), None);
    }

    #[test]
    fn test_port_spec_display() {
        assert_eq!(PortSpec::tcp(80).to_string(), "80/tcp");
        assert_eq!(PortSpec::udp(53).to_string(), "53/udp");
    }

    #[test]
    fn test_health_state_parse() {
        assert_eq!(HealthState::parse(None), HealthState::None);
        assert_eq!(HealthState::parse(Some("starting")), HealthState::Starting);
        assert_eq!(HealthState::parse(Some("healthy")), HealthState::Healthy);
        assert_eq!(
            HealthState::parse(Some("unhealthy")),
            HealthState::Unhealthy
        );
    }

    #[test]
    fn test_tcp_ports_are_derived_subset() {
        let mut ports = BTreeMap::new();
        ports.insert(PortSpec::tcp(80), 32768);
        ports.insert(PortSpec::udp(53), 32769);
        ports.insert(PortSpec::tcp(443), 32770);
        let info = ContainerInfo::new(
            "abc".to_string(),
            "abc-host".to_string(),
            "localhost".to_string(),
            NetworkMode::Bridge,
            ports,
            Value::Null,
        );

        assert_eq!(info.tcp_ports.len(), 2);
        assert_eq!(info.tcp_port(80), Some(32768));
        assert_eq!(info.tcp_port(443), Some(32770));
        assert_eq!(info.tcp_port(53), None);
        for (port, host_port) in &info.tcp_ports {
            assert_eq!(info.ports.get(&PortSpec::tcp(*port)), Some(host_port));
        }
    }

    #[test]
    fn test_short_id_truncates_long_ids_only() {
        let full = container("4febd3a1c8e907251f0fab49ab3ab225", &[]);
        assert_eq!(full.short_id(), "4febd3a1c8e9");
        let brief = container("web-1-id", &[]);
        assert_eq!(brief.short_id(), "web-1-id");
    }

    #[test]
    fn test_instance_keys_order_numerically() {
        let mut service = ServiceInfo::new("web");
        for index in [10u32, 2, 1] {
            service.containers.insert(
                format!("web_{}", index),
                container(&format!("c{}", index), &[]),
            );
        }

        let keys: Vec<_> = service.ordered().into_iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["web_1", "web_2", "web_10"]);
        assert_eq!(service.first().unwrap().id, "c1");
    }

    #[test]
    fn test_bare_service_name_resolves_first_instance() {
        let mut service = ServiceInfo::new("web");
        service
            .containers
            .insert("web_1".to_string(), container("c1", &[(80, 32768)]));

        assert_eq!(service.container("web_1").unwrap().id, "c1");
        assert_eq!(service.container("web").unwrap().id, "c1");
        assert!(service.container("db").is_none());
    }

    #[test]
    fn test_custom_key_does_not_alias_service_name() {
        let mut service = ServiceInfo::new("db");
        service
            .containers
            .insert("primary-db".to_string(), container("c1", &[]));

        assert_eq!(service.container("primary-db").unwrap().id, "c1");
        assert_eq!(service.container("db").unwrap().id, "c1");
    }

    #[test]
    fn test_services_info_lookup() {
        let mut web = ServiceInfo::new("web");
        web.containers
            .insert("web_1".to_string(), container("c1", &[(80, 32768)]));
        let mut map = BTreeMap::new();
        map.insert("web".to_string(), web);
        let services = ServicesInfo::new(map);

        assert_eq!(services.len(), 1);
        assert!(services.service("web").is_some());
        assert!(services.service("db").is_none());
        let containers = services.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].1, "web_1");
    }
}
