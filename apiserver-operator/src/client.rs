//! Contracts of the collaborators the reconcilers are driven through
//!
//! Reads go through [`Listers`], in-memory caches kept current by watch streams. Writes go through
//! the traits below, whose implementations talk to the cluster. All writes are idempotent: applying
//! an object that already matches reports `changed = false` and performs no write.
use crate::resources::ApiServerOperator;
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::Deployment,
        core::v1::{ConfigMap, Namespace, Pod, Secret, Service, ServiceAccount},
    },
    kube_aggregator::pkg::apis::apiregistration::v1::APIService,
};
use operator_core::{OperatorSpec, OperatorStatus, Result};
use operator_runtime::{reflector, Store};

/// Reads and writes the [`ApiServerOperator`] resource
///
/// Updates are guarded by `resource_version`: a stale version fails with a conflict error
/// (see [`operator_core::Error::is_conflict`]) instead of overwriting a concurrent write.
#[async_trait]
pub trait OperatorClient: Send + Sync {
    /// The current resource, read from the cluster
    async fn get(&self) -> Result<ApiServerOperator>;

    /// Replaces the spec
    async fn update_spec(&self, resource_version: &str, spec: OperatorSpec) -> Result<ApiServerOperator>;

    /// Replaces the status
    async fn update_status(&self, resource_version: &str, status: OperatorStatus) -> Result<ApiServerOperator>;
}

/// The outcome of an idempotent apply
#[derive(Clone, Debug, PartialEq)]
pub struct Applied<K> {
    /// The object as stored after the apply
    pub object: K,
    /// Whether a write happened
    pub changed: bool,
}

/// Create-or-update of the operand's static prerequisites
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Applies a namespace
    async fn apply_namespace(&self, required: Namespace) -> Result<Applied<Namespace>>;

    /// Applies a service account
    async fn apply_service_account(&self, required: ServiceAccount) -> Result<Applied<ServiceAccount>>;

    /// Applies a service
    async fn apply_service(&self, required: Service) -> Result<Applied<Service>>;

    /// Applies a config map
    async fn apply_config_map(&self, required: ConfigMap) -> Result<Applied<ConfigMap>>;

    /// Applies a secret
    async fn apply_secret(&self, required: Secret) -> Result<Applied<Secret>>;
}

/// Create-or-update of the operand workload
#[async_trait]
pub trait DeploymentApplier: Send + Sync {
    /// Applies `required`
    ///
    /// `expected_generation` is the generation recorded at the last successful apply; an existing
    /// object at another generation was modified by someone else and is overwritten. With
    /// `force_rollout` set, the pods are replaced even if the spec already matches.
    async fn apply_deployment(
        &self,
        required: Deployment,
        expected_generation: Option<i64>,
        force_rollout: bool,
    ) -> Result<Applied<Deployment>>;
}

/// Checks that an API group version is actually served
#[async_trait]
pub trait DiscoveryProbe: Send + Sync {
    /// Fails when discovery for `group_version` (e.g. `apps.openshift.io/v1`) does not answer
    async fn probe(&self, group_version: &str) -> Result<()>;
}

/// Read-only caches of every object kind the reconcilers look at
#[derive(Clone, Debug)]
pub struct Listers {
    /// Config maps in the interesting namespaces
    pub config_maps: Store<ConfigMap>,
    /// Secrets in the interesting namespaces
    pub secrets: Store<Secret>,
    /// Pods of the operand
    pub pods: Store<Pod>,
    /// Deployments in the target namespace
    pub deployments: Store<Deployment>,
    /// Cluster-scoped API registrations
    pub api_services: Store<APIService>,
}

/// The writing halves of the [`Listers`] caches
#[derive(Debug)]
pub struct ListerWriters {
    /// Feeds [`Listers::config_maps`]
    pub config_maps: reflector::Writer<ConfigMap>,
    /// Feeds [`Listers::secrets`]
    pub secrets: reflector::Writer<Secret>,
    /// Feeds [`Listers::pods`]
    pub pods: reflector::Writer<Pod>,
    /// Feeds [`Listers::deployments`]
    pub deployments: reflector::Writer<Deployment>,
    /// Feeds [`Listers::api_services`]
    pub api_services: reflector::Writer<APIService>,
}

impl Listers {
    /// Empty caches together with their writers
    ///
    /// The writers are meant to be handed to [`reflector::reflector`] over the matching watch streams.
    pub fn new() -> (Listers, ListerWriters) {
        let (config_maps, config_maps_w) = reflector::store();
        let (secrets, secrets_w) = reflector::store();
        let (pods, pods_w) = reflector::store();
        let (deployments, deployments_w) = reflector::store();
        let (api_services, api_services_w) = reflector::store();
        (
            Listers {
                config_maps,
                secrets,
                pods,
                deployments,
                api_services,
            },
            ListerWriters {
                config_maps: config_maps_w,
                secrets: secrets_w,
                pods: pods_w,
                deployments: deployments_w,
                api_services: api_services_w,
            },
        )
    }
}
