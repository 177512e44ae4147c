//! Connection metadata exposure
//!
//! Derives the deterministic names a dependent process discovers the
//! environment through: one set shaped for environment variables, one for
//! system properties. Names are derived on demand from a snapshot and
//! never stored.

use crate::state::{ContainerInfo, ServicesInfo};
use serde::Serialize;
use std::collections::BTreeMap;

/// Flat name-to-value maps derived from one snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExposedValues {
    /// Environment-variable names, upper snake case
    pub environment: BTreeMap<String, String>,
    /// System-property names, lower dot case
    pub properties: BTreeMap<String, String>,
}

impl ExposedValues {
    /// Inject the environment map into a child process
    pub fn apply_environment(&self, command: &mut tokio::process::Command) {
        for (name, value) in &self.environment {
            command.env(name, value);
        }
    }

    /// Render the property map in properties-file form
    pub fn render_properties(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.properties {
            out.push_str(name);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    fn insert_container(&mut self, stem: &str, container: &ContainerInfo) {
        let env_stem = env_name(stem);
        self.environment
            .insert(format!("{}_HOST", env_stem), container.host.clone());
        self.environment.insert(
            format!("{}_CONTAINER_HOSTNAME", env_stem),
            container.container_hostname.clone(),
        );
        self.properties
            .insert(format!("{}.host", stem), container.host.clone());
        self.properties.insert(
            format!("{}.container.hostname", stem),
            container.container_hostname.clone(),
        );
        for (spec, host_port) in &container.ports {
            self.environment.insert(
                format!(
                    "{}_{}_{}",
                    env_stem,
                    spec.protocol.to_string().to_uppercase(),
                    spec.port
                ),
                host_port.to_string(),
            );
            self.properties.insert(
                format!("{}.{}.{}", stem, spec.protocol, spec.port),
                host_port.to_string(),
            );
        }
    }
}

/// Derives exposure names from resolved service state
pub struct EnvironmentExposer;

impl EnvironmentExposer {
    /// Name every container of every service
    ///
    /// A singleton with a generated name is exposed under the bare service
    /// stem; scaled instances keep their indexed keys and custom container
    /// names are used verbatim.
    pub fn expose(services: &ServicesInfo) -> ExposedValues {
        let mut values = ExposedValues::default();
        for (service, info) in services.iter() {
            let singleton = info.len() == 1;
            for (key, container) in info.ordered() {
                let stem = if singleton && *key == format!("{}_1", service) {
                    service.clone()
                } else {
                    key.clone()
                };
                values.insert_container(&stem, container);
            }
        }
        values
    }
}

/// Environment-variable form of a stem
fn env_name(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
