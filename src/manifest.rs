//! Service manifest configuration

use crate::engine::EngineVersion;
use crate::error::{BerthError, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default manifest file names, probed in order
pub const DEFAULT_MANIFEST_FILES: &[&str] = &[
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

/// Default tool configuration file name
pub const TOOL_CONFIG_FILE: &str = "berth.yaml";

/// Configuration for one orchestrated compose environment
///
/// Immutable once orchestration starts; the orchestrator clones it and
/// compares fingerprints to decide whether a bring-up can be skipped.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    /// Ordered compose file paths; later files override earlier ones
    pub files: Vec<PathBuf>,
    /// Project name scoping every engine resource
    pub project_name: String,
    /// Environment overrides passed to each engine invocation
    pub environment: BTreeMap<String, String>,
    /// Requested replica count per service; absent means one
    pub scale: BTreeMap<String, u32>,
    /// Probe resolved TCP ports before declaring the environment ready
    pub wait_for_ready: bool,
    /// Upper bound for the whole readiness wait
    pub readiness_timeout: Duration,
    /// Pull images before bringing services up
    pub pull_before_up: bool,
    /// Remove orphan containers on tear-down
    pub remove_orphans: bool,
    /// Remove named volumes on tear-down
    pub remove_volumes: bool,
    /// Minimum tool version with server-side scale support
    pub scale_support_since: EngineVersion,
    /// Attempts of the container resolution loop
    pub resolve_attempts: u32,
    /// Delay between resolution attempts
    pub resolve_retry_delay: Duration,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            project_name: default_project_name(),
            environment: BTreeMap::new(),
            scale: BTreeMap::new(),
            wait_for_ready: true,
            readiness_timeout: Duration::from_secs(15 * 60),
            pull_before_up: false,
            remove_orphans: true,
            remove_volumes: false,
            scale_support_since: EngineVersion::new(1, 13, 0),
            resolve_attempts: 20,
            resolve_retry_delay: Duration::from_millis(500),
        }
    }
}

impl ManifestConfig {
    /// Create a configuration for the given project name
    pub fn new(project_name: &str) -> Self {
        let mut config = Self::default();
        config.project_name = sanitize_project_name(project_name);
        config
    }

    /// Add a compose file
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add an environment override
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    /// Request a replica count for a service
    pub fn scale(mut self, service: &str, replicas: u32) -> Self {
        self.scale.insert(service.to_string(), replicas);
        self
    }

    /// Enable or disable the readiness wait
    pub fn wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    /// Set the overall readiness timeout
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Pull images before bring-up
    pub fn pull_before_up(mut self, pull: bool) -> Self {
        self.pull_before_up = pull;
        self
    }

    /// Expected replica count for a service
    pub fn replicas(&self, service: &str) -> u32 {
        self.scale.get(service).copied().unwrap_or(1)
    }

    /// Whether any service requests more than one replica
    pub fn is_scaled(&self) -> bool {
        self.scale.values().any(|count| *count > 1)
    }

    /// Load configuration from a `berth.yaml` tool config file
    ///
    /// Compose file paths in the file resolve relative to its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: ManifestFile =
            serde_yaml::from_str(&content).map_err(|e| BerthError::Yaml(e.to_string()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut config = Self::default();
        config.files = file
            .files
            .into_iter()
            .map(|f| if f.is_absolute() { f } else { base.join(f) })
            .collect();
        if let Some(name) = file.project_name {
            config.project_name = sanitize_project_name(&name);
        }
        config.environment = file.environment;
        config.scale = file.scale;
        if let Some(wait) = file.wait_for_ready {
            config.wait_for_ready = wait;
        }
        if let Some(secs) = file.readiness_timeout_secs {
            config.readiness_timeout = Duration::from_secs(secs);
        }
        if let Some(pull) = file.pull_before_up {
            config.pull_before_up = pull;
        }
        if let Some(orphans) = file.remove_orphans {
            config.remove_orphans = orphans;
        }
        if let Some(volumes) = file.remove_volumes {
            config.remove_volumes = volumes;
        }
        if let Some(version) = file.scale_support_since {
            config.scale_support_since = version.parse()?;
        }
        if let Some(attempts) = file.resolve_attempts {
            config.resolve_attempts = attempts;
        }
        if let Some(ms) = file.resolve_retry_delay_ms {
            config.resolve_retry_delay = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Find a manifest file in the given directory
    pub fn find_manifest_file(dir: &Path) -> Option<PathBuf> {
        for name in DEFAULT_MANIFEST_FILES {
            let path = dir.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        None
    }

    /// Validate the configuration before orchestration starts
    pub fn validate(&self) -> Result<()> {
        if self.project_name.is_empty() {
            return Err(BerthError::InvalidConfig(
                "project name must not be empty".to_string(),
            ));
        }
        for (service, count) in &self.scale {
            if *count == 0 {
                return Err(BerthError::InvalidConfig(format!(
                    "scale for service '{}' must be at least 1",
                    service
                )));
            }
        }
        for file in &self.files {
            if !file.exists() {
                return Err(BerthError::InvalidConfig(format!(
                    "compose file not found: {}",
                    file.display()
                )));
            }
        }
        Ok(())
    }

    /// Digest of every bring-up-relevant field
    ///
    /// Two configurations with equal fingerprints produce the same
    /// environment, so a repeated `up` can reuse the cached snapshot.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.to_string_lossy().as_bytes());
            hasher.update([0]);
        }
        hasher.update(self.project_name.as_bytes());
        hasher.update([0]);
        for (key, value) in &self.environment {
            hasher.update(key.as_bytes());
            hasher.update([0]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        for (service, count) in &self.scale {
            hasher.update(service.as_bytes());
            hasher.update(count.to_be_bytes());
        }
        hasher.update([self.wait_for_ready as u8, self.pull_before_up as u8]);
        hasher.update(self.readiness_timeout.as_millis().to_be_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Project name derived from the working directory name
fn default_project_name() -> String {
    std::env::current_dir()
        .ok()
        .and_then(|dir| {
            dir.file_name()
                .map(|name| sanitize_project_name(&name.to_string_lossy()))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "berth".to_string())
}

/// Lowercase and strip characters the compose tool rejects in project names
pub fn sanitize_project_name(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized.trim_matches('-').to_string()
}

/// On-disk shape of `berth.yaml`
#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    files: Vec<PathBuf>,
    project_name: Option<String>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    scale: BTreeMap<String, u32>,
    wait_for_ready: Option<bool>,
    readiness_timeout_secs: Option<u64>,
    pull_before_up: Option<bool>,
    remove_orphans: Option<bool>,
    remove_volumes: Option<bool>,
    scale_support_since: Option<String>,
    resolve_attempts: Option<u32>,
    resolve_retry_delay_ms: Option<u64>,
}
