//! Service state resolution
//!
//! Pure grouping step between inspection parsing and readiness waiting:
//! turns a batch of parsed containers into the keyed [`ServicesInfo`]
//! snapshot, or reports which services do not match their declared
//! replica counts so the caller can retry.

use super::{ParsedContainer, ServiceInfo, ServicesInfo};
use crate::error::{BerthError, Result};
use crate::manifest::ManifestConfig;
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of one resolution attempt
#[derive(Debug)]
pub enum Resolution {
    /// Every declared service matched its expected replica count
    Complete(ServicesInfo),
    /// Container counts differ from the declared scale; worth retrying
    Incomplete { mismatched: Vec<String> },
}

/// Groups parsed containers into keyed service state
pub struct ServiceStateResolver;

impl ServiceStateResolver {
    /// Resolve one batch of parsed containers against the manifest
    ///
    /// Containers from services the manifest no longer declares are
    /// ignored. A declared service whose container count differs from its
    /// expected replica count, short or over, makes the whole attempt
    /// incomplete rather than resolved with the wrong key set.
    pub fn resolve(
        manifest: &ManifestConfig,
        declared: &[String],
        records: Vec<ParsedContainer>,
    ) -> Result<Resolution> {
        let mut groups: BTreeMap<String, Vec<ParsedContainer>> = BTreeMap::new();
        for record in records {
            if declared.contains(&record.service) {
                groups.entry(record.service.clone()).or_default().push(record);
            } else {
                debug!(
                    service = %record.service,
                    container = %record.name,
                    "ignoring container from undeclared service"
                );
            }
        }

        let mut mismatched = Vec::new();
        for service in declared {
            let have = groups.get(service).map(Vec::len).unwrap_or(0);
            let want = manifest.replicas(service) as usize;
            if have != want {
                mismatched.push(format!("{} ({}/{} containers)", service, have, want));
            }
        }
        if !mismatched.is_empty() {
            return Ok(Resolution::Incomplete { mismatched });
        }

        let mut services = BTreeMap::new();
        for (service, group) in groups {
            let info = Self::resolve_service(&manifest.project_name, &service, group)?;
            services.insert(service, info);
        }
        Ok(Resolution::Complete(ServicesInfo::new(services)))
    }

    fn resolve_service(
        project: &str,
        service: &str,
        mut group: Vec<ParsedContainer>,
    ) -> Result<ServiceInfo> {
        // stable instance order: engine number label, then creation
        // time, then container id
        group.sort_by(|a, b| match (a.number, b.number) {
            (Some(a_number), Some(b_number)) => a_number.cmp(&b_number),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => (a.created, &a.info.id).cmp(&(b.created, &b.info.id)),
        });

        let mut info = ServiceInfo::new(service);
        for (position, parsed) in group.into_iter().enumerate() {
            let key = if is_generated_name(&parsed.name, project, service) {
                let index = parsed.number.unwrap_or(position as u32 + 1);
                format!("{}_{}", service, index)
            } else {
                parsed.name.clone()
            };
            if info.containers.insert(key.clone(), parsed.info).is_some() {
                return Err(BerthError::Parse(format!(
                    "two containers of service {} resolve to key {}",
                    service, key
                )));
            }
        }
        Ok(info)
    }
}

/// Whether a container name follows the engine's generated scheme
///
/// Both separator dialects are accepted: `project_service_1` and
/// `project-service-1`. Anything else is a custom name and becomes the
/// container's key verbatim.
fn is_generated_name(name: &str, project: &str, service: &str) -> bool {
    let pattern = format!(
        r"^{}[-_]{}[-_]\d+$",
        regex::escape(project),
        regex::escape(service)
    );
    regex::Regex::new(&pattern)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}
