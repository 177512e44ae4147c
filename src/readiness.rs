//! TCP readiness probing
//!
//! Bring-up is only declared ready once every published TCP endpoint
//! accepts a connection. Each endpoint is probed in its own task with
//! backoff between attempts; one overall deadline bounds the whole wait
//! and reports the subset that never connected.

use crate::error::{BerthError, Result};
use crate::state::ServicesInfo;
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, trace, warn};

/// One probed TCP endpoint
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Container key the endpoint belongs to, for reporting
    pub container: String,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.container, self.host, self.port)
    }
}

/// Waits until every endpoint accepts a TCP connection
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    /// Per-attempt connect timeout
    pub connect_timeout: Duration,
    /// First retry delay; doubles after every failed attempt
    pub retry_delay: Duration,
    /// Retry delay cap
    pub max_retry_delay: Duration,
}

impl Default for ReadinessWaiter {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(1),
        }
    }
}

impl ReadinessWaiter {
    /// A waiter with default probe timings
    pub fn new() -> Self {
        Self::default()
    }

    /// Endpoints from every TCP port of every resolved container
    pub fn endpoints(services: &ServicesInfo) -> Vec<Endpoint> {
        let mut endpoints = Vec::new();
        for (_, key, info) in services.containers() {
            for host_port in info.tcp_ports.values() {
                endpoints.push(Endpoint {
                    host: info.host.clone(),
                    port: *host_port,
                    container: key.clone(),
                });
            }
        }
        endpoints
    }

    /// Probe all endpoints concurrently within the overall timeout
    ///
    /// On expiry the remaining probes are aborted and the error lists
    /// every endpoint that never connected. The environment itself is
    /// left untouched.
    pub async fn wait_until_ready(
        &self,
        endpoints: Vec<Endpoint>,
        overall: Duration,
    ) -> Result<()> {
        if endpoints.is_empty() {
            return Ok(());
        }
        debug!(count = endpoints.len(), ?overall, "waiting for TCP endpoints");

        let remaining: Arc<Mutex<BTreeSet<Endpoint>>> =
            Arc::new(Mutex::new(endpoints.iter().cloned().collect()));
        let mut probes = JoinSet::new();
        for endpoint in endpoints {
            let waiter = self.clone();
            let remaining = Arc::clone(&remaining);
            probes.spawn(async move {
                waiter.probe(&endpoint).await;
                if let Ok(mut set) = remaining.lock() {
                    set.remove(&endpoint);
                }
            });
        }

        let all_connected = async {
            while let Some(result) = probes.join_next().await {
                if let Err(error) = result {
                    warn!(%error, "readiness probe task failed");
                }
            }
        };
        match tokio::time::timeout(overall, all_connected).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let unreachable: Vec<String> = remaining
                    .lock()
                    .map_err(|_| BerthError::Lock("readiness probe state".to_string()))?
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                Err(BerthError::ReadinessTimeout {
                    timeout: overall,
                    unreachable,
                })
            }
        }
    }

    /// Retry one endpoint until it connects
    async fn probe(&self, endpoint: &Endpoint) {
        let mut delay = self.retry_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
            )
            .await
            {
                Ok(Ok(_)) => {
                    debug!(%endpoint, attempt, "endpoint reachable");
                    return;
                }
                Ok(Err(error)) => trace!(%endpoint, attempt, %error, "connect failed"),
                Err(_) => trace!(%endpoint, attempt, "connect timed out"),
            }
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
            tokio::time::sleep(delay + jitter).await;
            delay = (delay * 2).min(self.max_retry_delay);
        }
    }
}
