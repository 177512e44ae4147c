//! Compose tool version probing

use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the compose tool behind the engine boundary
///
/// Ordering is numeric per component, so `1.6.2` sorts below `1.13.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    /// Create a version from its components
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Extract a version from arbitrary tool output
    ///
    /// Accepts plain `2.24.5` as well as banner lines such as
    /// `docker-compose version 1.29.2, build 5becea4c`.
    pub fn from_tool_output(output: &str) -> Result<Self> {
        let re = regex::Regex::new(r"(\d+)\.(\d+)\.(\d+)").unwrap();
        let caps = re.captures(output).ok_or_else(|| {
            BerthError::Engine(format!("unrecognized version output: {}", output.trim()))
        })?;
        let part = |i: usize| {
            caps[i].parse::<u32>().map_err(|_| {
                BerthError::Engine(format!("version component out of range: {}", &caps[i]))
            })
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for EngineVersion {
    type Err = BerthError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().trim_start_matches('v').splitn(3, '.');
        let mut next = || parts.next().and_then(|p| p.parse::<u32>().ok());
        let major = next();
        let minor = next();
        let patch = next();
        match (major, minor, patch) {
            (Some(major), Some(minor), Some(patch)) => Ok(Self::new(major, minor, patch)),
            _ => Err(BerthError::InvalidConfig(format!(
                "invalid engine version: {}",
                s
            ))),
        }
    }
}
