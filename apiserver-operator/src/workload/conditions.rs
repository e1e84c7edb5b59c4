//! Status conditions derived from the freshly applied workload
use crate::apiservice::Unavailable;
use k8s_openapi::api::apps::v1::Deployment;
use kube_core::ResourceExt;
use operator_core::{generation::generation_observed, Aggregate, OperatorCondition};

/// Suffix of the availability condition
pub const DEPLOYMENT_AVAILABLE: &str = "DeploymentAvailable";
/// Suffix of the rollout condition
pub const DEPLOYMENT_PROGRESSING: &str = "DeploymentProgressing";
/// Suffix of the replica health condition
pub const DEPLOYMENT_DEGRADED: &str = "DeploymentDegraded";
/// Suffix of the sync failure condition
pub const WORKLOAD_DEGRADED: &str = "WorkloadDegraded";

/// Reason while the desired-state document is still empty
pub const PRECONDITION_NOT_FULFILLED: &str = "PreconditionNotFulfilled";
/// Reason when the deployment does not exist
pub const NO_DEPLOYMENT: &str = "NoDeployment";
/// Reason when no replica is ready
pub const NO_POD: &str = "NoAPIServerPod";

const AS_EXPECTED: &str = "AsExpected";

/// `<prefix><suffix>`, e.g. `APIServerDeploymentAvailable`
pub fn condition_type(prefix: &str, suffix: &str) -> String {
    format!("{prefix}{suffix}")
}

fn describe(deployment: &Deployment) -> String {
    format!(
        "deployment/{}.{}",
        deployment.name_any(),
        deployment.namespace().unwrap_or_default()
    )
}

/// Ready replicas as reported by the deployment controller
pub fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or_default()
}

/// `Available` from the outcome of the availability checks
pub fn available(prefix: &str, availability: &Result<(), Unavailable>) -> OperatorCondition {
    let type_ = condition_type(prefix, DEPLOYMENT_AVAILABLE);
    match availability {
        Ok(()) => OperatorCondition::new(type_, true).reason(AS_EXPECTED),
        Err(unavailable) => OperatorCondition::new(type_, false)
            .reason(unavailable.reason)
            .message(&unavailable.message),
    }
}

/// `Available=False` while there is no configuration to deploy
pub fn waiting(prefix: &str) -> OperatorCondition {
    OperatorCondition::new(condition_type(prefix, DEPLOYMENT_AVAILABLE), false)
        .reason(PRECONDITION_NOT_FULFILLED)
        .message("waiting for the observed configuration to be populated")
}

/// `Progressing` while either the deployment or the operator resource has not caught up
///
/// `recorded` is the deployment generation stored at the last successful apply.
pub fn progressing(
    prefix: &str,
    deployment: Option<&Deployment>,
    recorded: Option<i64>,
    operator_generation: i64,
    operator_observed_generation: i64,
) -> OperatorCondition {
    let mut messages = Vec::new();
    if let Some(deployment) = deployment {
        let generation = deployment.metadata.generation.unwrap_or_default();
        let observed = deployment
            .status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or_default();
        if !generation_observed(recorded, generation, observed) {
            if observed != generation {
                messages.push(format!(
                    "{}: observed generation is {observed}, desired generation is {generation}.",
                    describe(deployment)
                ));
            } else {
                messages.push(format!(
                    "{}: generation is {generation}, last applied generation is {}.",
                    describe(deployment),
                    recorded.unwrap_or_default()
                ));
            }
        }
    }
    if operator_generation != operator_observed_generation {
        messages.push(format!(
            "operator resource: observed generation is {operator_observed_generation}, desired generation is {operator_generation}."
        ));
    }

    let type_ = condition_type(prefix, DEPLOYMENT_PROGRESSING);
    if messages.is_empty() {
        OperatorCondition::new(type_, false).reason(AS_EXPECTED)
    } else {
        OperatorCondition::new(type_, true)
            .reason("NewGeneration")
            .message(messages.join("\n"))
    }
}

/// `DeploymentDegraded` while fewer replicas than requested are ready
pub fn deployment_degraded(prefix: &str, deployment: Option<&Deployment>, desired: i32) -> OperatorCondition {
    let type_ = condition_type(prefix, DEPLOYMENT_DEGRADED);
    let Some(deployment) = deployment else {
        return OperatorCondition::new(type_, true)
            .reason(NO_DEPLOYMENT)
            .message("deployment does not exist yet");
    };
    let ready = ready_replicas(deployment);
    if ready < desired {
        OperatorCondition::new(type_, true).reason("UnavailablePod").message(format!(
            "{} of {desired} requested instances are unavailable for {}",
            desired - ready,
            describe(deployment)
        ))
    } else {
        OperatorCondition::new(type_, false).reason(AS_EXPECTED)
    }
}

/// `WorkloadDegraded` carrying every error of the cycle
pub fn workload_degraded(prefix: &str, errors: &Aggregate) -> OperatorCondition {
    let type_ = condition_type(prefix, WORKLOAD_DEGRADED);
    if errors.is_empty() {
        OperatorCondition::new(type_, false)
    } else {
        OperatorCondition::new(type_, true)
            .reason("SyncError")
            .message(errors.to_string())
    }
}
