//! Availability of the API group versions served by the operand
//!
//! Two escalating checks, the first failing one wins: every group version must be registered
//! with an `Available=True` `APIService` in the cache, then discovery must actually answer for
//! each of them. Within one check all failures are reported together.
use crate::{client::DiscoveryProbe, config::split_group_version};
use k8s_openapi::kube_aggregator::pkg::apis::apiregistration::v1::APIService;
use operator_runtime::{reflector::ObjectRef, Store};

/// Reason when a registration is missing or not available
pub const APISERVICES_NOT_AVAILABLE: &str = "APIServicesNotAvailable";
/// Reason when discovery of a registered group version fails
pub const APISERVICES_DISCOVERY_FAILED: &str = "APIServicesDiscoveryFailed";

/// Why the served API is not available
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unavailable {
    /// Condition reason
    pub reason: &'static str,
    /// Every failure of the check, one per line
    pub message: String,
}

/// Name of the `APIService` registering `group_version`, `v1.apps.openshift.io` for `apps.openshift.io/v1`
pub fn api_service_name(group_version: &str) -> Option<String> {
    split_group_version(group_version).map(|(group, version)| format!("{version}.{group}"))
}

fn registration_problem(store: &Store<APIService>, group_version: &str) -> Option<String> {
    let Some(name) = api_service_name(group_version) else {
        return Some(format!("{group_version:?} is not a group version"));
    };
    let Some(service) = store.get(&ObjectRef::new(&name)) else {
        return Some(format!("apiservices.apiregistration.k8s.io/{name}: not present"));
    };
    let available = service
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Available"));
    match available {
        Some(condition) if condition.status == "True" => None,
        Some(condition) => Some(format!(
            "apiservices.apiregistration.k8s.io/{name}: not available: {}",
            condition.message.as_deref().unwrap_or_default()
        )),
        None => Some(format!("apiservices.apiregistration.k8s.io/{name}: no Available condition yet")),
    }
}

/// Checks that every group version has an available registration
pub fn check_registrations(store: &Store<APIService>, group_versions: &[String]) -> Result<(), Unavailable> {
    let problems: Vec<String> = group_versions
        .iter()
        .filter_map(|gv| registration_problem(store, gv))
        .collect();
    if problems.is_empty() {
        return Ok(());
    }
    Err(Unavailable {
        reason: APISERVICES_NOT_AVAILABLE,
        message: problems.join("\n"),
    })
}

/// Probes discovery of every group version
pub async fn check_discovery<P>(probe: &P, group_versions: &[String]) -> Result<(), Unavailable>
where
    P: DiscoveryProbe + ?Sized,
{
    let mut problems = Vec::new();
    for gv in group_versions {
        if let Err(err) = probe.probe(gv).await {
            tracing::debug!(group_version = %gv, %err, "discovery probe failed");
            problems.push(format!("{gv}: {err}"));
        }
    }
    if problems.is_empty() {
        return Ok(());
    }
    Err(Unavailable {
        reason: APISERVICES_DISCOVERY_FAILED,
        message: problems.join("\n"),
    })
}

/// Runs both checks, registrations first
pub async fn check_available<P>(
    store: &Store<APIService>,
    probe: &P,
    group_versions: &[String],
) -> Result<(), Unavailable>
where
    P: DiscoveryProbe + ?Sized,
{
    check_registrations(store, group_versions)?;
    check_discovery(probe, group_versions).await
}
