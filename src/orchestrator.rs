//! Compose lifecycle orchestration
//!
//! The orchestrator owns one session over one manifest: it brings the
//! environment up through the engine, resolves container state, waits for
//! readiness, and publishes an immutable snapshot. Tear-down is always an
//! explicit call; no failure path removes containers behind the caller's
//! back.

use crate::engine::ComposeEngine;
use crate::error::{BerthError, Result};
use crate::expose::{EnvironmentExposer, ExposedValues};
use crate::manifest::ManifestConfig;
use crate::network::NetworkInfoExtractor;
use crate::readiness::ReadinessWaiter;
use crate::state::resolver::Resolution;
use crate::state::{ContainerInfoParser, HealthState, ServiceStateResolver, ServicesInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Phase of the orchestration session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    /// No environment is up
    Idle,
    /// Engine bring-up in progress
    BringingUp,
    /// Containers are being resolved
    Resolving,
    /// Waiting for health and TCP readiness
    Waiting,
    /// Environment resolved and reachable
    Ready,
    /// Bring-up failed; containers may be partially up
    Failed,
    /// Readiness wait expired; environment left running
    TimedOut,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::BringingUp => write!(f, "bringing-up"),
            SessionPhase::Resolving => write!(f, "resolving"),
            SessionPhase::Waiting => write!(f, "waiting"),
            SessionPhase::Ready => write!(f, "ready"),
            SessionPhase::Failed => write!(f, "failed"),
            SessionPhase::TimedOut => write!(f, "timed-out"),
        }
    }
}

/// Reportable view of the current session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    /// Session id, unique per orchestrator
    pub session_id: String,
    /// Project the session orchestrates
    pub project: String,
    /// Current phase
    pub phase: SessionPhase,
    /// When the environment last became ready
    pub brought_up_at: Option<DateTime<Utc>>,
    /// Resolved services, when a snapshot exists
    pub services: Option<ServicesInfo>,
}

#[derive(Debug)]
struct Session {
    phase: SessionPhase,
    fingerprint: Option<String>,
    services: Option<Arc<ServicesInfo>>,
    brought_up_at: Option<DateTime<Utc>>,
}

/// Orchestrates one compose environment end to end
pub struct ComposeOrchestrator {
    manifest: ManifestConfig,
    engine: Arc<dyn ComposeEngine>,
    parser: ContainerInfoParser,
    waiter: ReadinessWaiter,
    session_id: String,
    session: RwLock<Session>,
}

impl ComposeOrchestrator {
    /// Create an orchestrator for the given manifest and engine
    pub fn new(manifest: ManifestConfig, engine: Arc<dyn ComposeEngine>) -> Self {
        let parser = ContainerInfoParser::new(NetworkInfoExtractor::new(engine.daemon().clone()));
        Self {
            manifest,
            engine,
            parser,
            waiter: ReadinessWaiter::new(),
            session_id: Uuid::new_v4().to_string().replace('-', "")[..12].to_string(),
            session: RwLock::new(Session {
                phase: SessionPhase::Idle,
                fingerprint: None,
                services: None,
                brought_up_at: None,
            }),
        }
    }

    /// Override the probe timings
    pub fn with_waiter(mut self, waiter: ReadinessWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// The manifest this session orchestrates
    pub fn manifest(&self) -> &ManifestConfig {
        &self.manifest
    }

    /// Replace the manifest for subsequent bring-ups
    ///
    /// The cached snapshot stays in place; the next `up` compares
    /// fingerprints and re-runs the engine only when the configuration
    /// actually changed.
    pub fn reconfigure(&mut self, manifest: ManifestConfig) {
        self.manifest = manifest;
    }

    /// Current session phase
    pub fn phase(&self) -> Result<SessionPhase> {
        Ok(self.session_read()?.phase)
    }

    /// Cached snapshot from the last successful bring-up
    pub fn services_info(&self) -> Result<Option<Arc<ServicesInfo>>> {
        Ok(self.session_read()?.services.clone())
    }

    /// Exposure names derived from the cached snapshot
    pub fn exposed_values(&self) -> Result<Option<ExposedValues>> {
        Ok(self
            .services_info()?
            .map(|services| EnvironmentExposer::expose(&services)))
    }

    /// Reportable snapshot of the session
    pub fn status(&self) -> Result<SessionStatus> {
        let session = self.session_read()?;
        Ok(SessionStatus {
            session_id: self.session_id.clone(),
            project: self.manifest.project_name.clone(),
            phase: session.phase,
            brought_up_at: session.brought_up_at,
            services: session.services.as_deref().cloned(),
        })
    }

    /// Bring the environment up, resolve it, and wait for readiness
    ///
    /// Idempotent per configuration: while the manifest fingerprint
    /// matches the cached snapshot the engine is not touched and the
    /// cached services are returned. Failures leave whatever came up
    /// running; tear-down stays an explicit [`down`](Self::down).
    pub async fn up(&self) -> Result<Arc<ServicesInfo>> {
        self.manifest.validate()?;
        let fingerprint = self.manifest.fingerprint();
        {
            let session = self.session_read()?;
            if session.phase == SessionPhase::Ready
                && session.fingerprint.as_ref() == Some(&fingerprint)
            {
                if let Some(cached) = &session.services {
                    debug!(
                        project = %self.manifest.project_name,
                        "environment already up, reusing snapshot"
                    );
                    return Ok(Arc::clone(cached));
                }
            }
        }

        self.preflight().await?;

        self.set_phase(SessionPhase::BringingUp)?;
        info!(
            project = %self.manifest.project_name,
            session = %self.session_id,
            "bringing environment up"
        );
        if self.manifest.pull_before_up {
            self.engine
                .pull(&self.manifest)
                .await
                .map_err(|e| self.fail(e))?;
        }
        self.engine
            .up(&self.manifest)
            .await
            .map_err(|e| self.fail(e))?;

        self.set_phase(SessionPhase::Resolving)?;
        let services = self.resolve().await.map_err(|e| self.fail(e))?;

        if self.manifest.wait_for_ready {
            self.set_phase(SessionPhase::Waiting)?;
            self.wait_ready(&services).await.map_err(|e| self.fail(e))?;
        }

        let services = Arc::new(services);
        {
            let mut session = self.session_write()?;
            session.phase = SessionPhase::Ready;
            session.fingerprint = Some(fingerprint);
            session.services = Some(Arc::clone(&services));
            session.brought_up_at = Some(Utc::now());
        }
        info!(
            project = %self.manifest.project_name,
            services = services.len(),
            "environment ready"
        );
        Ok(services)
    }

    /// Tear the environment down
    ///
    /// The session returns to Idle from any phase; an engine failure
    /// still propagates after local state is cleared.
    pub async fn down(&self) -> Result<()> {
        info!(project = %self.manifest.project_name, "tearing environment down");
        let result = self.engine.down(&self.manifest).await;
        {
            let mut session = self.session_write()?;
            session.phase = SessionPhase::Idle;
            session.fingerprint = None;
            session.services = None;
            session.brought_up_at = None;
        }
        result
    }

    /// Pull images without touching the session
    pub async fn pull(&self) -> Result<()> {
        self.engine.pull(&self.manifest).await
    }

    /// Resolve the currently running environment without bringing it up
    ///
    /// One-shot: the environment must already be up and complete.
    pub async fn resolve_running(&self) -> Result<ServicesInfo> {
        let declared = self.engine.services(&self.manifest).await?;
        match self.try_resolve(&declared).await? {
            Resolution::Complete(services) => Ok(services),
            Resolution::Incomplete { mismatched } => {
                Err(BerthError::ServiceNotFound(mismatched.join(", ")))
            }
        }
    }

    /// Reject unsupported requests before any engine side effect
    async fn preflight(&self) -> Result<()> {
        if self.manifest.is_scaled() {
            let version = self.engine.version().await?;
            if version < self.manifest.scale_support_since {
                return Err(BerthError::UnsupportedOperation(format!(
                    "scaling requires compose {} or newer, found {}",
                    self.manifest.scale_support_since, version
                )));
            }
            debug!(%version, "scale preflight passed");
        }
        Ok(())
    }

    /// Bounded resolution loop over ps and inspect
    ///
    /// Parse failures and services still short of containers are retried
    /// up to the configured attempt count; every other error escalates
    /// immediately.
    async fn resolve(&self) -> Result<ServicesInfo> {
        let declared = self.engine.services(&self.manifest).await?;
        if declared.is_empty() {
            return Err(BerthError::InvalidConfig(
                "manifest declares no services".to_string(),
            ));
        }

        let mut last_failure = None;
        for attempt in 1..=self.manifest.resolve_attempts.max(1) {
            if attempt > 1 {
                tokio::time::sleep(self.manifest.resolve_retry_delay).await;
            }
            match self.try_resolve(&declared).await {
                Ok(Resolution::Complete(services)) => {
                    debug!(attempt, services = services.len(), "resolution complete");
                    return Ok(services);
                }
                Ok(Resolution::Incomplete { mismatched }) => {
                    debug!(attempt, mismatched = %mismatched.join(", "), "resolution incomplete");
                    last_failure = Some(BerthError::ServiceNotFound(mismatched.join(", ")));
                }
                Err(BerthError::Parse(message)) => {
                    warn!(attempt, %message, "inspect output not parseable yet");
                    last_failure = Some(BerthError::Parse(message));
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_failure
            .unwrap_or_else(|| BerthError::Engine("resolution produced no result".to_string())))
    }

    async fn try_resolve(&self, declared: &[String]) -> Result<Resolution> {
        let ids = self.engine.ps(&self.manifest).await?;
        let records = self.engine.inspect(&ids).await?;
        let mut parsed = Vec::with_capacity(records.len());
        for record in &records {
            parsed.push(self.parser.parse(record)?);
        }
        ServiceStateResolver::resolve(&self.manifest, declared, parsed)
    }

    /// Health poll then TCP probing, together bounded by the readiness timeout
    async fn wait_ready(&self, services: &ServicesInfo) -> Result<()> {
        let started = Instant::now();
        self.wait_healthy(&started).await?;
        let remaining = self
            .manifest
            .readiness_timeout
            .saturating_sub(started.elapsed());
        let endpoints = ReadinessWaiter::endpoints(services);
        self.waiter.wait_until_ready(endpoints, remaining).await
    }

    /// Poll engine healthchecks out of their starting state
    ///
    /// Containers without a healthcheck pass straight through; a verdict
    /// of unhealthy fails bring-up instead of letting TCP probes spin on
    /// a port that will never serve.
    async fn wait_healthy(&self, started: &Instant) -> Result<()> {
        loop {
            let ids = self.engine.ps(&self.manifest).await?;
            let records = self.engine.inspect(&ids).await?;
            let mut starting = Vec::new();
            for record in &records {
                let name = record
                    .pointer("/Name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .trim_start_matches('/');
                let health = HealthState::parse(
                    record
                        .pointer("/State/Health/Status")
                        .and_then(Value::as_str),
                );
                match health {
                    HealthState::Unhealthy => {
                        return Err(BerthError::ContainerUnhealthy(name.to_string()));
                    }
                    HealthState::Starting => starting.push(name.to_string()),
                    HealthState::Healthy | HealthState::None => {}
                }
            }
            if starting.is_empty() {
                return Ok(());
            }
            if started.elapsed() >= self.manifest.readiness_timeout {
                return Err(BerthError::ReadinessTimeout {
                    timeout: self.manifest.readiness_timeout,
                    unreachable: starting
                        .into_iter()
                        .map(|name| format!("{} (healthcheck pending)", name))
                        .collect(),
                });
            }
            debug!(pending = starting.len(), "healthchecks still starting");
            tokio::time::sleep(self.manifest.resolve_retry_delay).await;
        }
    }

    fn fail(&self, error: BerthError) -> BerthError {
        let phase = match &error {
            BerthError::ReadinessTimeout { .. } => SessionPhase::TimedOut,
            _ => SessionPhase::Failed,
        };
        if let Ok(mut session) = self.session.write() {
            session.phase = phase;
        }
        error
    }

    fn set_phase(&self, phase: SessionPhase) -> Result<()> {
        self.session_write()?.phase = phase;
        Ok(())
    }

    fn session_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Session>> {
        self.session
            .read()
            .map_err(|_| BerthError::Lock("session state".to_string()))
    }

    fn session_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Session>> {
        self.session
            .write()
            .map_err(|_| BerthError::Lock("session state".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DaemonInfo, EngineVersion};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct MockEngine {
        daemon: DaemonInfo,
        version: EngineVersion,
        declared: Vec<String>,
        batches: Vec<Vec<Value>>,
        cursor: AtomicUsize,
        up_calls: AtomicUsize,
        down_calls: AtomicUsize,
        pull_calls: AtomicUsize,
        fail_up: bool,
    }

    impl MockEngine {
        fn new(declared: &[&str], batches: Vec<Vec<Value>>) -> Self {
            Self {
                daemon: DaemonInfo::localhost(),
                version: EngineVersion::new(2, 24, 5),
                declared: declared.iter().map(|s| s.to_string()).collect(),
                batches,
                cursor: AtomicUsize::new(0),
                up_calls: AtomicUsize::new(0),
                down_calls: AtomicUsize::new(0),
                pull_calls: AtomicUsize::new(0),
                fail_up: false,
            }
        }

        fn with_version(mut self, version: EngineVersion) -> Self {
            self.version = version;
            self
        }

        fn failing_up(mut self) -> Self {
            self.fail_up = true;
            self
        }

        fn batch(&self, index: usize) -> Vec<Value> {
            let clamped = index.min(self.batches.len().saturating_sub(1));
            self.batches.get(clamped).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ComposeEngine for MockEngine {
        async fn version(&self) -> Result<EngineVersion> {
            Ok(self.version)
        }

        async fn pull(&self, _manifest: &ManifestConfig) -> Result<()> {
            self.pull_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn up(&self, _manifest: &ManifestConfig) -> Result<()> {
            self.up_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_up {
                return Err(BerthError::Engine("exit status 1: boom".to_string()));
            }
            Ok(())
        }

        async fn down(&self, _manifest: &ManifestConfig) -> Result<()> {
            self.down_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn ps(&self, _manifest: &ManifestConfig) -> Result<Vec<String>> {
            let batch = self.batch(self.cursor.load(Ordering::SeqCst));
            Ok(batch
                .iter()
                .filter_map(|record| record.pointer("/Id").and_then(Value::as_str))
                .map(String::from)
                .collect())
        }

        async fn inspect(&self, _ids: &[String]) -> Result<Vec<Value>> {
            let batch = self.batch(self.cursor.fetch_add(1, Ordering::SeqCst));
            Ok(batch)
        }

        async fn services(&self, _manifest: &ManifestConfig) -> Result<Vec<String>> {
            Ok(self.declared.clone())
        }

        fn daemon(&self) -> &DaemonInfo {
            &self.daemon
        }
    }

    fn record(service: &str, number: u32, host_port: u16) -> Value {
        record_with_health(service, number, host_port, None)
    }

    fn record_with_health(
        service: &str,
        number: u32,
        host_port: u16,
        health: Option<&str>,
    ) -> Value {
        let id = format!("{}-{}-id", service, number);
        let state = match health {
            Some(status) => json!({ "Status": "running", "Health": { "Status": status } }),
            None => json!({ "Status": "running" }),
        };
        json!({
            "Id": id,
            "Name": format!("/itest-{}-{}", service, number),
            "Created": format!("2024-01-15T10:30:{:02}Z", number),
            "State": state,
            "Config": {
                "Hostname": id,
                "ExposedPorts": { "80/tcp": {} },
                "Labels": {
                    "com.docker.compose.service": service,
                    "com.docker.compose.container-number": number.to_string()
                }
            },
            "HostConfig": { "NetworkMode": "itest_default" },
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [ { "HostIp": "0.0.0.0", "HostPort": host_port.to_string() } ]
                }
            }
        })
    }

    fn quick_manifest() -> ManifestConfig {
        let mut manifest = ManifestConfig::new("itest").wait_for_ready(false);
        manifest.resolve_attempts = 5;
        manifest.resolve_retry_delay = Duration::from_millis(10);
        manifest
    }

    fn fast_waiter() -> ReadinessWaiter {
        ReadinessWaiter {
            connect_timeout: Duration::from_millis(250),
            retry_delay: Duration::from_millis(20),
            max_retry_delay: Duration::from_millis(50),
        }
    }

    fn orchestrator(manifest: ManifestConfig, engine: MockEngine) -> ComposeOrchestrator {
        ComposeOrchestrator::new(manifest, Arc::new(engine)).with_waiter(fast_waiter())
    }

    #[tokio::test]
    async fn test_up_resolves_services() {
        let engine = MockEngine::new(&["web"], vec![vec![record("web", 1, 32768)]]);
        let orchestrator = orchestrator(quick_manifest(), engine);

        let services = orchestrator.up().await.unwrap();
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Ready);
        let web = services.service("web").unwrap();
        assert_eq!(web.container("web").unwrap().tcp_port(80), Some(32768));

        let values = orchestrator.exposed_values().unwrap().unwrap();
        assert_eq!(
            values.environment.get("WEB_TCP_80").map(String::as_str),
            Some("32768")
        );
    }

    #[tokio::test]
    async fn test_up_twice_reuses_snapshot() {
        let engine = Arc::new(MockEngine::new(
            &["web"],
            vec![vec![record("web", 1, 32768)]],
        ));
        let orchestrator =
            ComposeOrchestrator::new(quick_manifest(), engine.clone()).with_waiter(fast_waiter());

        let first = orchestrator.up().await.unwrap();
        let second = orchestrator.up().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.up_calls.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_reconfigure_triggers_fresh_bring_up() {
        let engine = Arc::new(MockEngine::new(
            &["web"],
            vec![vec![record("web", 1, 32768)]],
        ));
        let mut orchestrator =
            ComposeOrchestrator::new(quick_manifest(), engine.clone()).with_waiter(fast_waiter());

        orchestrator.up().await.unwrap();
        assert_eq!(engine.up_calls.load(Ordering::SeqCst), 1);

        orchestrator.up().await.unwrap();
        assert_eq!(engine.up_calls.load(Ordering::SeqCst), 1);

        orchestrator.reconfigure(quick_manifest().env("TAG", "edge"));
        orchestrator.up().await.unwrap();
        assert_eq!(engine.up_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scale_below_threshold_fails_before_engine_up() {
        let engine = Arc::new(
            MockEngine::new(&["web"], vec![vec![record("web", 1, 32768)]])
                .with_version(EngineVersion::new(1, 6, 2)),
        );
        let orchestrator = ComposeOrchestrator::new(quick_manifest().scale("web", 2), engine.clone())
            .with_waiter(fast_waiter());

        let err = orchestrator.up().await.unwrap_err();
        assert!(matches!(err, BerthError::UnsupportedOperation(_)));
        assert_eq!(engine.up_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_scaled_service_resolves_indexed_keys() {
        let engine = MockEngine::new(
            &["web"],
            vec![vec![record("web", 1, 32768), record("web", 2, 32769)]],
        );
        let orchestrator = orchestrator(quick_manifest().scale("web", 2), engine);

        let services = orchestrator.up().await.unwrap();
        let web = services.service("web").unwrap();
        assert_eq!(web.len(), 2);
        assert_eq!(web.container("web_1").unwrap().tcp_port(80), Some(32768));
        assert_eq!(web.container("web_2").unwrap().tcp_port(80), Some(32769));
        assert_eq!(web.first().unwrap().id, "web-1-id");
    }

    #[tokio::test]
    async fn test_engine_failure_leaves_failed_phase() {
        let engine = MockEngine::new(&["web"], vec![vec![]]).failing_up();
        let orchestrator = orchestrator(quick_manifest(), engine);

        let err = orchestrator.up().await.unwrap_err();
        assert!(matches!(err, BerthError::Engine(_)));
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Failed);
        assert!(orchestrator.services_info().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolution_retries_parse_failures() {
        let malformed = json!({ "Name": "/itest-web-1" });
        let engine = MockEngine::new(
            &["web"],
            vec![vec![malformed], vec![record("web", 1, 32768)]],
        );
        let orchestrator = orchestrator(quick_manifest(), engine);

        let services = orchestrator.up().await.unwrap();
        assert!(services.service("web").is_some());
    }

    #[tokio::test]
    async fn test_resolution_waits_for_containers_to_appear() {
        let engine = MockEngine::new(&["web"], vec![vec![], vec![record("web", 1, 32768)]]);
        let orchestrator = orchestrator(quick_manifest(), engine);

        let services = orchestrator.up().await.unwrap();
        assert_eq!(services.len(), 1);
    }

    #[tokio::test]
    async fn test_resolution_exhaustion_escalates_last_cause() {
        let engine = MockEngine::new(&["web", "db"], vec![vec![record("web", 1, 32768)]]);
        let mut manifest = quick_manifest();
        manifest.resolve_attempts = 2;
        let orchestrator = orchestrator(manifest, engine);

        let err = orchestrator.up().await.unwrap_err();
        match err {
            BerthError::ServiceNotFound(missing) => assert!(missing.contains("db")),
            other => panic!("expected missing service error, got {:?}", other),
        }
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Failed);
    }

    #[tokio::test]
    async fn test_ready_after_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let engine = MockEngine::new(&["web"], vec![vec![record("web", 1, port)]]);
        let manifest = quick_manifest().wait_for_ready(true);
        let orchestrator = orchestrator(manifest, engine);

        orchestrator.up().await.unwrap();
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_readiness_timeout_leaves_environment_running() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = Arc::new(MockEngine::new(
            &["web"],
            vec![vec![record("web", 1, dead_port)]],
        ));
        let manifest = quick_manifest()
            .wait_for_ready(true)
            .readiness_timeout(Duration::from_millis(400));
        let orchestrator =
            ComposeOrchestrator::new(manifest, engine.clone()).with_waiter(fast_waiter());

        let err = orchestrator.up().await.unwrap_err();
        assert!(matches!(err, BerthError::ReadinessTimeout { .. }));
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::TimedOut);
        assert_eq!(engine.down_calls.load(Ordering::SeqCst), 0);

        orchestrator.down().await.unwrap();
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Idle);
        assert_eq!(engine.down_calls.load(Ordering::SeqCst), 1);
        assert!(orchestrator.services_info().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_container_fails_bring_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let engine = MockEngine::new(
            &["web"],
            vec![
                vec![record("web", 1, port)],
                vec![record_with_health("web", 1, port, Some("unhealthy"))],
            ],
        );
        let orchestrator = orchestrator(quick_manifest().wait_for_ready(true), engine);

        let err = orchestrator.up().await.unwrap_err();
        assert!(matches!(err, BerthError::ContainerUnhealthy(_)));
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Failed);
    }

    #[tokio::test]
    async fn test_waits_for_healthcheck_verdict() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let engine = MockEngine::new(
            &["web"],
            vec![
                vec![record_with_health("web", 1, port, Some("healthy"))],
                vec![record_with_health("web", 1, port, Some("starting"))],
                vec![record_with_health("web", 1, port, Some("healthy"))],
            ],
        );
        let orchestrator = orchestrator(quick_manifest().wait_for_ready(true), engine);

        orchestrator.up().await.unwrap();
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_wait_disabled_skips_probing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = MockEngine::new(&["web"], vec![vec![record("web", 1, dead_port)]]);
        let orchestrator = orchestrator(quick_manifest(), engine);

        orchestrator.up().await.unwrap();
        assert_eq!(orchestrator.phase().unwrap(), SessionPhase::Ready);
    }

    #[tokio::test]
    async fn test_pull_before_up() {
        let engine = Arc::new(MockEngine::new(
            &["web"],
            vec![vec![record("web", 1, 32768)]],
        ));
        let mut manifest = quick_manifest();
        manifest.pull_before_up = true;
        let orchestrator =
            ComposeOrchestrator::new(manifest, engine.clone()).with_waiter(fast_waiter());

        orchestrator.up().await.unwrap();
        assert_eq!(engine.pull_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_reports_session() {
        let engine = MockEngine::new(&["web"], vec![vec![record("web", 1, 32768)]]);
        let orchestrator = orchestrator(quick_manifest(), engine);

        let status = orchestrator.status().unwrap();
        assert_eq!(status.phase, SessionPhase::Idle);
        assert!(status.services.is_none());
        assert!(status.brought_up_at.is_none());

        orchestrator.up().await.unwrap();
        let status = orchestrator.status().unwrap();
        assert_eq!(status.project, "itest");
        assert_eq!(status.phase, SessionPhase::Ready);
        assert!(status.brought_up_at.is_some());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["phase"], "ready");
        assert_eq!(json["project"], "itest");
        assert_eq!(json["services"]["web"]["containers"]["web_1"]["ports"]["80/tcp"], 32768);

        assert!(status.services.unwrap().service("web").is_some());
    }
}
