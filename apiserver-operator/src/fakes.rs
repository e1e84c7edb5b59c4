//! In-memory collaborators for tests
use crate::{
    client::{Applied, DeploymentApplier, DiscoveryProbe, ListerWriters, Listers, OperatorClient, ResourceApplier},
    config::{split_group_version, OperatorConfig},
    configobserver::ObserverContext,
    resources::ApiServerOperator,
};
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentStatus},
        core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    kube_aggregator::pkg::apis::apiregistration::v1::{APIService, APIServiceCondition, APIServiceStatus},
};
use kube_core::ResourceExt;
use operator_core::{Error, ErrorResponse, OperatorSpec, OperatorStatus, Result};
use operator_runtime::{
    events::{InMemoryRecorder, Recorder},
    WatchEvent,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::Instant;

/// Holds one [`ApiServerOperator`], with resource version checks like the apiserver
pub(crate) struct FakeOperatorClient {
    state: Mutex<ApiServerOperator>,
    conflicts: AtomicUsize,
    status_writes: AtomicUsize,
    spec_writes: AtomicUsize,
}

impl FakeOperatorClient {
    pub(crate) fn new() -> Self {
        let mut op = ApiServerOperator::new("cluster");
        op.metadata.resource_version = Some("1".into());
        op.metadata.generation = Some(1);
        Self {
            state: Mutex::new(op),
            conflicts: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            spec_writes: AtomicUsize::new(0),
        }
    }

    /// Fails the next `n` writes with a conflict
    pub(crate) fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub(crate) fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn spec_writes(&self) -> usize {
        self.spec_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn operator(&self) -> ApiServerOperator {
        self.state.lock().clone()
    }

    pub(crate) fn status(&self) -> OperatorStatus {
        self.state.lock().status.clone().unwrap_or_default()
    }

    /// A spec change made by somebody else
    pub(crate) fn edit_spec(&self, edit: impl FnOnce(&mut OperatorSpec)) {
        let mut state = self.state.lock();
        edit(&mut state.spec);
        bump(&mut state, true);
    }

    fn guard(&self, state: &ApiServerOperator, resource_version: &str) -> Result<()> {
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || state.metadata.resource_version.as_deref() != Some(resource_version) {
            return Err(Error::conflict("the object has been modified; please apply your changes to the latest version"));
        }
        Ok(())
    }
}

fn bump(op: &mut ApiServerOperator, spec_changed: bool) {
    let rv: u64 = op
        .metadata
        .resource_version
        .as_deref()
        .and_then(|rv| rv.parse().ok())
        .unwrap_or_default();
    op.metadata.resource_version = Some((rv + 1).to_string());
    if spec_changed {
        op.metadata.generation = Some(op.generation() + 1);
    }
}

#[async_trait]
impl OperatorClient for FakeOperatorClient {
    async fn get(&self) -> Result<ApiServerOperator> {
        Ok(self.operator())
    }

    async fn update_spec(&self, resource_version: &str, spec: OperatorSpec) -> Result<ApiServerOperator> {
        let mut state = self.state.lock();
        self.guard(&state, resource_version)?;
        let changed = state.spec != spec;
        state.spec = spec;
        bump(&mut state, changed);
        self.spec_writes.fetch_add(1, Ordering::SeqCst);
        Ok(state.clone())
    }

    async fn update_status(&self, resource_version: &str, status: OperatorStatus) -> Result<ApiServerOperator> {
        let mut state = self.state.lock();
        self.guard(&state, resource_version)?;
        state.status = Some(status);
        bump(&mut state, false);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(state.clone())
    }
}

/// Cluster state behind the listers, plus appliers and a discovery probe writing into it
pub(crate) struct FakeCluster {
    pub(crate) listers: Listers,
    writers: Mutex<ListerWriters>,
    pub(crate) config: OperatorConfig,
    pub(crate) recorder: InMemoryRecorder,
    recorder_dyn: Arc<dyn Recorder>,
    namespaces: Mutex<BTreeMap<String, Namespace>>,
    service_accounts: Mutex<BTreeMap<String, ServiceAccount>>,
    services: Mutex<BTreeMap<String, Service>>,
    deployment_applies: Mutex<Vec<(Option<i64>, bool)>>,
    apply_times: Mutex<Vec<Instant>>,
    apply_failure: Mutex<Option<String>>,
    ready_replicas: Mutex<i32>,
    failing_probes: Mutex<BTreeSet<String>>,
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        ..ObjectMeta::default()
    }
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        let (listers, writers) = Listers::new();
        let recorder = InMemoryRecorder::default();
        Self {
            listers,
            writers: Mutex::new(writers),
            config: OperatorConfig::default(),
            recorder_dyn: Arc::new(recorder.clone()),
            recorder,
            namespaces: Mutex::default(),
            service_accounts: Mutex::default(),
            services: Mutex::default(),
            deployment_applies: Mutex::default(),
            apply_times: Mutex::default(),
            apply_failure: Mutex::default(),
            ready_replicas: Mutex::new(0),
            failing_probes: Mutex::default(),
        }
    }

    pub(crate) fn recorder(&self) -> Arc<dyn Recorder> {
        self.recorder_dyn.clone()
    }

    pub(crate) fn ctx(&self) -> ObserverContext<'_> {
        ObserverContext {
            listers: &self.listers,
            config: &self.config,
            recorder: &self.recorder_dyn,
        }
    }

    pub(crate) fn put_config_map(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let cm = ConfigMap {
            metadata: meta(namespace, name),
            data: Some(data.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..ConfigMap::default()
        };
        self.writers.lock().config_maps.apply_event(&WatchEvent::Applied(cm));
    }

    pub(crate) fn put_secret(&self, secret: Secret) {
        self.writers.lock().secrets.apply_event(&WatchEvent::Applied(secret));
    }

    pub(crate) fn remove_secret(&self, namespace: &str, name: &str) {
        let secret = Secret {
            metadata: meta(namespace, name),
            ..Secret::default()
        };
        self.writers.lock().secrets.apply_event(&WatchEvent::Deleted(secret));
    }

    pub(crate) fn put_pods(&self, pods: Vec<Pod>) {
        self.writers.lock().pods.apply_event(&WatchEvent::Restarted(pods));
    }

    /// Replaces the replicas with `names`, all running the revision of the current pod template
    pub(crate) fn roll_pods(&self, names: &[&str]) -> String {
        let revision = self
            .deployment()
            .and_then(|d| d.spec)
            .and_then(|spec| spec.template.metadata)
            .and_then(|meta| meta.labels)
            .and_then(|labels| labels.get(&self.config.encryption.revision_label).cloned())
            .unwrap_or_default();
        self.put_pods(names.iter().map(|name| operand_pod(name, &revision)).collect());
        revision
    }

    /// Registers every configured group version, reporting `available`
    pub(crate) fn register_api_services(&self, available: bool) {
        let services = self
            .config
            .api_group_versions
            .iter()
            .filter_map(|gv| split_group_version(gv))
            .map(|(group, version)| APIService {
                metadata: ObjectMeta {
                    name: Some(format!("{version}.{group}")),
                    ..ObjectMeta::default()
                },
                status: Some(APIServiceStatus {
                    conditions: Some(vec![APIServiceCondition {
                        type_: "Available".into(),
                        status: if available { "True" } else { "False" }.into(),
                        reason: Some(if available { "Passed" } else { "FailedDiscoveryCheck" }.into()),
                        message: (!available).then(|| "no response from https://10.128.0.5:8443".to_string()),
                        last_transition_time: None,
                    }]),
                }),
                ..APIService::default()
            })
            .collect();
        self.writers
            .lock()
            .api_services
            .apply_event(&WatchEvent::Restarted(services));
    }

    pub(crate) fn fail_probe(&self, group_version: &str) {
        self.failing_probes.lock().insert(group_version.to_owned());
    }

    pub(crate) fn fail_deployment_applies(&self, message: Option<&str>) {
        *self.apply_failure.lock() = message.map(String::from);
    }

    pub(crate) fn deployment(&self) -> Option<Deployment> {
        self.listers
            .deployments
            .get_namespaced(&self.config.target_namespace, &self.config.deployment_name)
            .map(|d| (*d).clone())
    }

    /// `(expected_generation, force_rollout)` of every deployment apply so far
    pub(crate) fn deployment_applies(&self) -> Vec<(Option<i64>, bool)> {
        self.deployment_applies.lock().clone()
    }

    /// When each deployment apply happened
    pub(crate) fn apply_times(&self) -> Vec<Instant> {
        self.apply_times.lock().clone()
    }

    fn update_deployment(&self, edit: impl FnOnce(&mut Deployment)) {
        if let Some(mut deployment) = self.deployment() {
            edit(&mut deployment);
            self.writers
                .lock()
                .deployments
                .apply_event(&WatchEvent::Applied(deployment));
        }
    }

    /// Replicas reported ready by current and future deployments
    pub(crate) fn set_ready_replicas(&self, ready: i32) {
        *self.ready_replicas.lock() = ready;
        self.update_deployment(|d| {
            d.status.get_or_insert_with(DeploymentStatus::default).ready_replicas = Some(ready);
        });
    }

    /// Overwrites the deployment's generation bookkeeping, as its controller would
    pub(crate) fn set_deployment_generations(&self, generation: i64, observed_generation: i64) {
        self.update_deployment(|d| {
            d.metadata.generation = Some(generation);
            d.status.get_or_insert_with(DeploymentStatus::default).observed_generation = Some(observed_generation);
        });
    }
}

fn apply_into<K: Clone + PartialEq>(map: &Mutex<BTreeMap<String, K>>, key: String, required: K) -> Applied<K> {
    let mut map = map.lock();
    let changed = map.get(&key) != Some(&required);
    map.insert(key, required.clone());
    Applied {
        object: required,
        changed,
    }
}

#[async_trait]
impl ResourceApplier for FakeCluster {
    async fn apply_namespace(&self, required: Namespace) -> Result<Applied<Namespace>> {
        Ok(apply_into(&self.namespaces, required.name_any(), required))
    }

    async fn apply_service_account(&self, required: ServiceAccount) -> Result<Applied<ServiceAccount>> {
        let key = format!("{}/{}", required.namespace().unwrap_or_default(), required.name_any());
        Ok(apply_into(&self.service_accounts, key, required))
    }

    async fn apply_service(&self, required: Service) -> Result<Applied<Service>> {
        let key = format!("{}/{}", required.namespace().unwrap_or_default(), required.name_any());
        Ok(apply_into(&self.services, key, required))
    }

    async fn apply_config_map(&self, required: ConfigMap) -> Result<Applied<ConfigMap>> {
        let existing = self
            .listers
            .config_maps
            .get_namespaced(&required.namespace().unwrap_or_default(), &required.name_any());
        let changed = existing.as_deref() != Some(&required);
        if changed {
            self.writers
                .lock()
                .config_maps
                .apply_event(&WatchEvent::Applied(required.clone()));
        }
        Ok(Applied {
            object: required,
            changed,
        })
    }

    async fn apply_secret(&self, required: Secret) -> Result<Applied<Secret>> {
        let existing = self
            .listers
            .secrets
            .get_namespaced(&required.namespace().unwrap_or_default(), &required.name_any());
        let changed = existing.as_deref() != Some(&required);
        if changed {
            self.writers
                .lock()
                .secrets
                .apply_event(&WatchEvent::Applied(required.clone()));
        }
        Ok(Applied {
            object: required,
            changed,
        })
    }
}

#[async_trait]
impl DeploymentApplier for FakeCluster {
    async fn apply_deployment(
        &self,
        mut required: Deployment,
        expected_generation: Option<i64>,
        force_rollout: bool,
    ) -> Result<Applied<Deployment>> {
        self.deployment_applies
            .lock()
            .push((expected_generation, force_rollout));
        self.apply_times.lock().push(Instant::now());
        if let Some(message) = self.apply_failure.lock().clone() {
            return Err(Error::Api(ErrorResponse {
                status: "Failure".into(),
                message,
                reason: "InternalError".into(),
                code: 500,
            }));
        }

        let existing = self.deployment();
        let generation = match &existing {
            None => 1,
            Some(existing) => {
                let unchanged = existing.spec == required.spec
                    && existing.metadata.annotations == required.metadata.annotations
                    && existing.metadata.labels == required.metadata.labels;
                let generation = existing.metadata.generation.unwrap_or(1);
                if unchanged && !force_rollout {
                    return Ok(Applied {
                        object: existing.clone(),
                        changed: false,
                    });
                }
                generation + 1
            }
        };
        required.metadata.generation = Some(generation);
        required.status = Some(DeploymentStatus {
            observed_generation: Some(generation),
            replicas: required.spec.as_ref().and_then(|s| s.replicas),
            ready_replicas: Some(*self.ready_replicas.lock()),
            ..DeploymentStatus::default()
        });
        self.writers
            .lock()
            .deployments
            .apply_event(&WatchEvent::Applied(required.clone()));
        Ok(Applied {
            object: required,
            changed: true,
        })
    }
}

#[async_trait]
impl DiscoveryProbe for FakeCluster {
    async fn probe(&self, group_version: &str) -> Result<()> {
        if self.failing_probes.lock().contains(group_version) {
            return Err(Error::Api(ErrorResponse {
                status: "Failure".into(),
                message: format!("the server is currently unable to handle the request ({group_version})"),
                reason: "ServiceUnavailable".into(),
                code: 503,
            }));
        }
        Ok(())
    }
}

/// A running replica of the operand at `revision`
pub(crate) fn operand_pod(name: &str, revision: &str) -> Pod {
    use k8s_openapi::api::core::v1::PodStatus;

    let mut pod = Pod {
        metadata: meta("openshift-apiserver", name),
        status: Some(PodStatus {
            phase: Some("Running".into()),
            ..PodStatus::default()
        }),
        ..Pod::default()
    };
    pod.metadata.labels = Some(
        [("apiserver", "true"), ("revision", revision)]
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .into(),
    );
    pod
}
