//! Compose CLI adapter
//!
//! Thin production implementation of [`ComposeEngine`] on top of the
//! `docker compose` plugin or the standalone `docker-compose` binary. It
//! assembles argument vectors, runs the tool, and returns raw output;
//! inspection always goes through the `docker` binary regardless of
//! flavor.

use super::{ComposeEngine, DaemonInfo, EngineVersion};
use crate::error::{BerthError, Result};
use crate::manifest::ManifestConfig;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, trace};

/// Which compose flavor is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` plugin
    Plugin,
    /// Standalone `docker-compose` binary
    Standalone,
}

/// Production engine backed by the compose CLI
pub struct ComposeCli {
    flavor: ComposeFlavor,
    daemon: DaemonInfo,
}

impl ComposeCli {
    /// Probe the PATH for an installed compose tool
    ///
    /// The daemon location is taken from `DOCKER_HOST` when set.
    pub async fn detect() -> Result<Self> {
        let daemon = DaemonInfo::from_endpoint(std::env::var("DOCKER_HOST").ok().as_deref());
        for flavor in [ComposeFlavor::Plugin, ComposeFlavor::Standalone] {
            let mut cmd = Self::program(flavor);
            cmd.arg("version");
            if let Ok(output) = cmd.output().await {
                if output.status.success() {
                    debug!(?flavor, "detected compose tool");
                    return Ok(Self { flavor, daemon });
                }
            }
        }
        Err(BerthError::Engine(
            "no compose tool found; install the docker compose plugin or docker-compose"
                .to_string(),
        ))
    }

    /// Use a known flavor and daemon location instead of probing
    pub fn with_flavor(flavor: ComposeFlavor, daemon: DaemonInfo) -> Self {
        Self { flavor, daemon }
    }

    fn program(flavor: ComposeFlavor) -> Command {
        match flavor {
            ComposeFlavor::Plugin => {
                let mut cmd = Command::new("docker");
                cmd.arg("compose");
                cmd
            }
            ComposeFlavor::Standalone => Command::new("docker-compose"),
        }
    }

    /// Project and file arguments shared by every invocation
    fn compose_args(manifest: &ManifestConfig) -> Vec<String> {
        let mut args = vec!["--project-name".to_string(), manifest.project_name.clone()];
        for file in &manifest.files {
            args.push("--file".to_string());
            args.push(file.to_string_lossy().to_string());
        }
        args
    }

    fn up_args(manifest: &ManifestConfig) -> Vec<String> {
        let mut args = vec!["up".to_string(), "-d".to_string()];
        for (service, replicas) in &manifest.scale {
            args.push("--scale".to_string());
            args.push(format!("{}={}", service, replicas));
        }
        args
    }

    fn down_args(manifest: &ManifestConfig) -> Vec<String> {
        let mut args = vec!["down".to_string()];
        if manifest.remove_orphans {
            args.push("--remove-orphans".to_string());
        }
        if manifest.remove_volumes {
            args.push("--volumes".to_string());
        }
        args
    }

    /// Compose invocation scoped to the manifest's project
    fn command(&self, manifest: &ManifestConfig) -> Command {
        let mut cmd = Self::program(self.flavor);
        cmd.args(Self::compose_args(manifest));
        cmd.envs(&manifest.environment);
        cmd
    }

    async fn run(&self, mut cmd: Command, action: &str) -> Result<String> {
        trace!(?cmd, "running engine command");
        let output = cmd.output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BerthError::Engine(format!(
                "{} failed ({}): {}",
                action,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ComposeEngine for ComposeCli {
    async fn version(&self) -> Result<EngineVersion> {
        let mut cmd = Self::program(self.flavor);
        cmd.arg("version");
        let stdout = self.run(cmd, "compose version").await?;
        EngineVersion::from_tool_output(&stdout)
    }

    async fn pull(&self, manifest: &ManifestConfig) -> Result<()> {
        let mut cmd = self.command(manifest);
        cmd.arg("pull");
        debug!(project = %manifest.project_name, "pulling images");
        self.run(cmd, "compose pull").await?;
        Ok(())
    }

    async fn up(&self, manifest: &ManifestConfig) -> Result<()> {
        let mut cmd = self.command(manifest);
        cmd.args(Self::up_args(manifest));
        debug!(project = %manifest.project_name, "bringing services up");
        self.run(cmd, "compose up").await?;
        Ok(())
    }

    async fn down(&self, manifest: &ManifestConfig) -> Result<()> {
        let mut cmd = self.command(manifest);
        cmd.args(Self::down_args(manifest));
        debug!(project = %manifest.project_name, "tearing services down");
        self.run(cmd, "compose down").await?;
        Ok(())
    }

    async fn ps(&self, manifest: &ManifestConfig) -> Result<Vec<String>> {
        let mut cmd = self.command(manifest);
        cmd.args(["ps", "-q"]);
        let stdout = self.run(cmd, "compose ps").await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    async fn inspect(&self, ids: &[String]) -> Result<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = Command::new("docker");
        cmd.arg("inspect").args(ids);
        let stdout = self.run(cmd, "docker inspect").await?;
        let records: Vec<Value> = serde_json::from_str(&stdout)?;
        Ok(records)
    }

    async fn services(&self, manifest: &ManifestConfig) -> Result<Vec<String>> {
        let mut cmd = self.command(manifest);
        cmd.args(["config", "--services"]);
        let stdout = self.run(cmd, "compose config").await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn daemon(&self) -> &DaemonInfo {
        &self.daemon
    }
}
