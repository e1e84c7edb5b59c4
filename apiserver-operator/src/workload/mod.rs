//! Rolling out the operand and reporting how it is doing
//!
//! Every cycle recomputes everything from scratch:
//!
//! 1. Nothing is deployed while the observed config is still empty; the operator waits instead.
//! 2. The static prerequisites are applied, including the config map holding the rendered config.
//! 3. The digests of every mounted dependency are compared with those recorded on the deployment.
//! 4. The deployment is applied, forcing a new rollout when the operator resource changed since
//!    the last cycle, a prerequisite changed, or a dependency digest changed. A forced rollout
//!    cuts the next revision and snapshots the encryption configuration for it first.
//! 5. Conditions are derived from the deployment as just applied and written if they changed.
//!
//! Errors of individual steps do not stop the cycle. They are collected, reported through the
//! `WorkloadDegraded` condition and returned together at the end.
use crate::{
    apiservice::{check_available, Unavailable},
    client::{DeploymentApplier, DiscoveryProbe, Listers, OperatorClient, ResourceApplier},
    config::OperatorConfig,
    resources::ApiServerOperator,
    status::update_status,
    Error, Result,
};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use operator_core::{
    conditions::{find_condition, set_condition},
    generation::{expected_generation, set_generation},
    Aggregate, ConditionStatus, DesiredStateDocument, GenerationStatus, ManagementState,
};
use operator_runtime::{events::Recorder, Action, Reconciler};
use std::sync::Arc;

pub mod conditions;
pub mod deployment;
pub mod operand;

use conditions::{condition_type, ready_replicas, DEPLOYMENT_AVAILABLE, DEPLOYMENT_PROGRESSING, NO_DEPLOYMENT, NO_POD};

/// Everything the synchronizer writes through
#[derive(Clone)]
pub struct Appliers {
    /// Prerequisite objects
    pub resources: Arc<dyn ResourceApplier>,
    /// The deployment
    pub deployments: Arc<dyn DeploymentApplier>,
    /// Discovery of the served API
    pub discovery: Arc<dyn DiscoveryProbe>,
}

/// A successfully applied deployment and the revision its pods run
struct Rollout {
    deployment: Deployment,
    revision: i64,
}

/// The workload synchronizer controller
pub struct WorkloadSynchronizer {
    client: Arc<dyn OperatorClient>,
    appliers: Appliers,
    listers: Listers,
    config: Arc<OperatorConfig>,
    recorder: Arc<dyn Recorder>,
}

impl std::fmt::Debug for WorkloadSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadSynchronizer")
            .field("deployment", &self.config.deployment_name)
            .field("namespace", &self.config.target_namespace)
            .finish_non_exhaustive()
    }
}

impl WorkloadSynchronizer {
    /// A synchronizer for the deployment named in `config`
    pub fn new(
        client: Arc<dyn OperatorClient>,
        appliers: Appliers,
        listers: Listers,
        config: Arc<OperatorConfig>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        Self {
            client,
            appliers,
            listers,
            config,
            recorder,
        }
    }

    /// Applies the prerequisites, returning whether any of them changed
    async fn sync_prerequisites(&self, operator: &ApiServerOperator, errors: &mut Aggregate) -> bool {
        let config = &*self.config;
        let resources = &self.appliers.resources;
        let mut changed = Vec::new();

        match resources.apply_namespace(operand::namespace(config)).await {
            Ok(applied) if applied.changed => changed.push("Namespace"),
            Ok(_) => {}
            Err(err) => errors.push(err),
        }
        match resources.apply_service_account(operand::service_account(config)).await {
            Ok(applied) if applied.changed => changed.push("ServiceAccount"),
            Ok(_) => {}
            Err(err) => errors.push(err),
        }
        match operand::service(config) {
            Ok(service) => match resources.apply_service(service).await {
                Ok(applied) if applied.changed => changed.push("Service"),
                Ok(_) => {}
                Err(err) => errors.push(err),
            },
            Err(err) => errors.push(err),
        }
        let config_map = operand::render(&operator.spec).and_then(|rendered| operand::config_map(config, &rendered));
        match config_map {
            Ok(cm) => match resources.apply_config_map(cm).await {
                Ok(applied) if applied.changed => changed.push("ConfigMap"),
                Ok(_) => {}
                Err(err) => errors.push(err),
            },
            Err(err) => errors.push(err),
        }

        for kind in &changed {
            self.recorder
                .event(&format!("{kind}Updated"), format!("Applied {kind} for {}", config.deployment_name));
        }
        !changed.is_empty()
    }

    /// Applies the deployment, forcing a rollout if anything it depends on moved
    async fn sync_deployment(
        &self,
        operator: &ApiServerOperator,
        prerequisites_changed: bool,
        recorded: Option<i64>,
    ) -> Result<Rollout> {
        let config = &*self.config;
        let status = operator.status.clone().unwrap_or_default();
        let hash = deployment::dependency_hash(&self.listers, config);
        let existing = self
            .listers
            .deployments
            .get_namespaced(&config.target_namespace, &config.deployment_name);
        let changed_dependencies = existing
            .as_deref()
            .map(|d| hash.changed_from(&deployment::recorded_hash(d)))
            .unwrap_or_default();
        let generation_mismatch = operator.generation() != status.observed_generation;

        let force = generation_mismatch || prerequisites_changed || !changed_dependencies.is_empty();
        let latest = status.latest_available_revision;
        let revision = if force || latest == 0 { latest + 1 } else { latest };
        if force {
            tracing::info!(
                generation_mismatch,
                prerequisites_changed,
                ?changed_dependencies,
                revision,
                "forcing a new rollout"
            );
        }
        if revision != latest {
            self.snapshot_encryption_config(revision).await?;
        }

        let proxy = deployment::proxy_env(&self.listers, config);
        let required = deployment::build(config, operator, revision, &hash, &proxy)?;
        let applied = self
            .appliers
            .deployments
            .apply_deployment(required, recorded, force)
            .await?;
        if applied.changed {
            let message = if changed_dependencies.is_empty() {
                format!("Applied deployment {} at revision {revision}", config.deployment_name)
            } else {
                format!(
                    "Applied deployment {} at revision {revision} because of changes to {}",
                    config.deployment_name,
                    changed_dependencies.join(", ")
                )
            };
            self.recorder.event("DeploymentUpdated", message);
        }
        Ok(Rollout {
            deployment: applied.object,
            revision,
        })
    }

    /// Copies the current encryption configuration to the snapshot `revision` mounts
    ///
    /// Has to succeed before the revision rolls out: replicas labelled with a revision whose
    /// snapshot is missing count as running without encryption.
    async fn snapshot_encryption_config(&self, revision: i64) -> Result<()> {
        let Some(snapshot) = deployment::encryption_snapshot(&self.listers, &self.config, revision) else {
            return Ok(());
        };
        let applied = self.appliers.resources.apply_secret(snapshot).await?;
        if applied.changed {
            tracing::debug!(secret = ?applied.object.metadata.name, "snapshotted encryption configuration");
        }
        Ok(())
    }

    async fn availability(&self, deployment: Option<&Deployment>) -> Result<(), Unavailable> {
        let Some(deployment) = deployment else {
            return Err(Unavailable {
                reason: NO_DEPLOYMENT,
                message: format!(
                    "deployment/{}.{}: could not be retrieved",
                    self.config.deployment_name, self.config.target_namespace
                ),
            });
        };
        if ready_replicas(deployment) == 0 {
            return Err(Unavailable {
                reason: NO_POD,
                message: format!("no {} pods available on any node", self.config.deployment_name),
            });
        }
        check_available(
            &self.listers.api_services,
            &*self.appliers.discovery,
            &self.config.api_group_versions,
        )
        .await
    }

    async fn wait_for_config(&self) -> Result<Action> {
        tracing::info!("observed config is empty, waiting before deploying anything");
        let prefix = &self.config.condition_prefix;
        update_status(&*self.client, |status| {
            set_condition(&mut status.conditions, conditions::waiting(prefix));
            set_condition(&mut status.conditions, conditions::workload_degraded(prefix, &Aggregate::new()));
        })
        .await?;
        Ok(Action::requeue_rate_limited())
    }
}

#[async_trait]
impl Reconciler for WorkloadSynchronizer {
    type Error = Error;

    fn name(&self) -> &str {
        "workload"
    }

    async fn reconcile(&self) -> Result<Action> {
        let operator = self.client.get().await?;
        if operator.spec.management_state != ManagementState::Managed {
            tracing::debug!(state = ?operator.spec.management_state, "not managed, skipping sync");
            return Ok(Action::await_change());
        }
        if DesiredStateDocument::from_value(operator.spec.observed_config.clone())?.is_empty() {
            return self.wait_for_config().await;
        }

        let config = &*self.config;
        let prefix = &config.condition_prefix;
        let status = operator.status.clone().unwrap_or_default();
        let mut errors = Aggregate::new();
        let (group, resource, ns, name) = ("apps", "deployments", &config.target_namespace, &config.deployment_name);
        let recorded = expected_generation(&status.generations, group, resource, ns, name);

        let prerequisites_changed = self.sync_prerequisites(&operator, &mut errors).await;
        let applied = match self.sync_deployment(&operator, prerequisites_changed, recorded).await {
            Ok(applied) => Some(applied),
            Err(err) => {
                self.recorder
                    .warning("DeploymentUpdateFailed", format!("Failed to apply deployment {name}: {err}"));
                errors.push(err);
                None
            }
        };
        let recorded = applied
            .as_ref()
            .and_then(|r| r.deployment.metadata.generation)
            .or(recorded);
        let current = match &applied {
            Some(r) => Some(r.deployment.clone()),
            None => self.listers.deployments.get_namespaced(ns, name).map(|d| (*d).clone()),
        };

        let availability = self.availability(current.as_ref()).await;
        let available = conditions::available(prefix, &availability);
        let progressing = conditions::progressing(
            prefix,
            current.as_ref(),
            recorded,
            operator.generation(),
            status.observed_generation,
        );
        let degraded = conditions::deployment_degraded(prefix, current.as_ref(), config.replicas);
        let ready = current.as_ref().map(ready_replicas).unwrap_or_default();
        let generation = operator.generation();
        let revision = applied.as_ref().map(|r| r.revision);
        let record = applied.as_ref().and_then(|r| r.deployment.metadata.generation).map(|last_generation| GenerationStatus {
            group: group.into(),
            resource: resource.into(),
            namespace: ns.clone(),
            name: name.clone(),
            last_generation,
            hash: String::new(),
        });
        let workload_degraded = conditions::workload_degraded(prefix, &errors);

        let written = update_status(&*self.client, |status| {
            set_condition(&mut status.conditions, available.clone());
            set_condition(&mut status.conditions, progressing.clone());
            set_condition(&mut status.conditions, degraded.clone());
            set_condition(&mut status.conditions, workload_degraded.clone());
            status.ready_replicas = ready;
            // a failed apply leaves the new generation unobserved, so the next cycle still forces
            if let Some(record) = &record {
                status.observed_generation = generation;
                set_generation(&mut status.generations, record.clone());
            }
            if let Some(revision) = revision {
                status.latest_available_revision = revision;
            }
        })
        .await;
        let status = match written {
            Ok((status, _)) => status,
            Err(err) => {
                errors.push(err);
                return Err(errors.into());
            }
        };
        errors.into_result()?;

        let is = |suffix: &str, expected: ConditionStatus| {
            find_condition(&status.conditions, &condition_type(prefix, suffix)).map(|c| c.status) == Some(expected)
        };
        if is(DEPLOYMENT_AVAILABLE, ConditionStatus::True) && is(DEPLOYMENT_PROGRESSING, ConditionStatus::False) {
            Ok(Action::await_change())
        } else {
            tracing::debug!("workload not settled yet");
            Ok(Action::requeue_rate_limited())
        }
    }
}
