//! Operator configuration
//!
//! Everything is optional in the YAML form; missing fields take the defaults below.
//!
//! ```
//! use apiserver_operator::config::OperatorConfig;
//! let config = OperatorConfig::from_yaml("targetNamespace: my-apiserver\nreplicas: 2\n").unwrap();
//! assert_eq!(config.target_namespace, "my-apiserver");
//! assert_eq!(config.replicas, 2);
//! assert_eq!(config.operator_namespace, "openshift-apiserver-operator");
//! ```
use crate::{Error, Result};
use operator_runtime::{controller, NamespaceFilter};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// Static configuration of the operator process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace the operator itself runs in
    pub operator_namespace: String,
    /// Namespace of the managed workload
    pub target_namespace: String,
    /// Namespace holding cluster-wide configuration facts
    pub config_namespace: String,
    /// Name of the `ApiServerOperator` resource to reconcile
    pub operator_name: String,
    /// Name of the managed deployment
    pub deployment_name: String,
    /// Prefix of the workload status conditions, e.g. `APIServer`
    pub condition_prefix: String,
    /// Operand image
    pub image: String,
    /// Desired operand replicas
    pub replicas: i32,
    /// Names of the operand objects and of the cluster facts they are built from
    pub objects: ObjectNames,
    /// Timers and retry bounds of the controllers
    pub timing: Timing,
    /// Namespaces whose events trigger a reconcile
    ///
    /// Defaults to the operator, target and config namespaces.
    pub interesting_namespaces: Vec<String>,
    /// API group versions the operand serves, e.g. `apps.openshift.io/v1`
    pub api_group_versions: Vec<String>,
    /// Where the deployed encryption configuration is read from
    pub encryption: EncryptionSource,
}

/// Names of operand objects and cluster facts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectNames {
    /// Service account the operand runs as
    pub service_account: String,
    /// Service in front of the operand
    pub service: String,
    /// Config map holding the rendered operand configuration
    pub operand_config: String,
    /// Config maps in the target namespace the operand mounts
    pub dependency_config_maps: Vec<String>,
    /// Secrets in the target namespace the operand mounts
    pub dependency_secrets: Vec<String>,
    /// Namespace of the etcd endpoints config map
    pub etcd_namespace: String,
    /// Config map mapping etcd member ids to their addresses
    pub etcd_endpoints: String,
    /// Cluster image configuration, in the config namespace
    pub image_config: String,
    /// Cluster ingress configuration, in the config namespace
    pub ingress_config: String,
    /// Cluster project configuration, in the config namespace
    pub project_config: String,
    /// Cluster proxy configuration, in the config namespace
    pub proxy_config: String,
}

/// Timers and retry bounds
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timing {
    /// Resync period of the config observer, in seconds
    pub config_observer_resync_seconds: u64,
    /// Resync period of the workload synchronizer, in seconds
    pub workload_resync_seconds: u64,
    /// First retry delay after a failed reconcile, in milliseconds
    pub backoff_base_millis: u64,
    /// Upper bound of the retry delay, in seconds
    pub backoff_max_seconds: u64,
}

/// Pods whose revision decides which encryption configuration is deployed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionSource {
    /// Whether encryption at rest is managed at all
    pub enabled: bool,
    /// Namespace of the replica pods and the revisioned secrets
    pub namespace: String,
    /// Labels selecting the replica pods
    pub pod_selector: BTreeMap<String, String>,
    /// Pod label carrying the deployed revision
    pub revision_label: String,
    /// Revisioned secrets are named `<prefix>-<revision>`
    pub secret_prefix: String,
    /// Path the operand reads the encryption configuration from
    pub provider_config_path: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: "openshift-apiserver-operator".into(),
            target_namespace: "openshift-apiserver".into(),
            config_namespace: "openshift-config".into(),
            operator_name: "cluster".into(),
            deployment_name: "apiserver".into(),
            condition_prefix: "APIServer".into(),
            image: "quay.io/openshift/origin-openshift-apiserver:latest".into(),
            replicas: 3,
            objects: ObjectNames::default(),
            timing: Timing::default(),
            interesting_namespaces: Vec::new(),
            api_group_versions: [
                "apps.openshift.io/v1",
                "authorization.openshift.io/v1",
                "build.openshift.io/v1",
                "image.openshift.io/v1",
                "project.openshift.io/v1",
                "quota.openshift.io/v1",
                "route.openshift.io/v1",
                "security.openshift.io/v1",
                "template.openshift.io/v1",
            ]
            .map(String::from)
            .to_vec(),
            encryption: EncryptionSource::default(),
        }
    }
}

impl Default for ObjectNames {
    fn default() -> Self {
        Self {
            service_account: "openshift-apiserver-sa".into(),
            service: "api".into(),
            operand_config: "config".into(),
            dependency_config_maps: vec!["config".into(), "etcd-serving-ca".into(), "trusted-ca-bundle".into()],
            dependency_secrets: vec!["etcd-client".into(), "serving-cert".into(), "encryption-config".into()],
            etcd_namespace: "openshift-etcd".into(),
            etcd_endpoints: "etcd-endpoints".into(),
            image_config: "image-config".into(),
            ingress_config: "ingress-config".into(),
            project_config: "project-config".into(),
            proxy_config: "proxy-config".into(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            config_observer_resync_seconds: 60,
            workload_resync_seconds: 60,
            backoff_base_millis: 5,
            backoff_max_seconds: 1000,
        }
    }
}

impl Default for EncryptionSource {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "openshift-apiserver".into(),
            pod_selector: BTreeMap::from([("apiserver".to_string(), "true".to_string())]),
            revision_label: "revision".into(),
            secret_prefix: "encryption-config".into(),
            provider_config_path: "/var/run/secrets/encryption-config/encryption-config".into(),
        }
    }
}

impl OperatorConfig {
    /// Parses and validates a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the controllers cannot work with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("operatorNamespace", &self.operator_namespace),
            ("targetNamespace", &self.target_namespace),
            ("configNamespace", &self.config_namespace),
            ("operatorName", &self.operator_name),
            ("deploymentName", &self.deployment_name),
            ("image", &self.image),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(Error::InvalidConfig(format!("{field} must not be empty")));
        }
        if self.replicas < 1 {
            return Err(Error::InvalidConfig(format!("replicas must be positive, got {}", self.replicas)));
        }
        if self.timing.backoff_base_millis == 0 || self.timing.backoff_max_seconds == 0 {
            return Err(Error::InvalidConfig("backoff bounds must be positive".into()));
        }
        if let Some(gv) = self.api_group_versions.iter().find(|gv| split_group_version(gv).is_none()) {
            return Err(Error::InvalidConfig(format!("{gv:?} is not of the form <group>/<version>")));
        }
        Ok(())
    }

    /// The namespace predicate shared by all controllers
    pub fn namespace_filter(&self) -> NamespaceFilter {
        if self.interesting_namespaces.is_empty() {
            NamespaceFilter::new([
                self.operator_namespace.clone(),
                self.target_namespace.clone(),
                self.config_namespace.clone(),
                self.objects.etcd_namespace.clone(),
            ])
        } else {
            NamespaceFilter::new(self.interesting_namespaces.iter().cloned())
        }
    }

    fn controller_config(&self, resync_seconds: u64) -> controller::Config {
        let config = controller::Config::default().backoff(
            Duration::from_millis(self.timing.backoff_base_millis),
            Duration::from_secs(self.timing.backoff_max_seconds),
        );
        if resync_seconds == 0 {
            config
        } else {
            config.resync_every(Duration::from_secs(resync_seconds))
        }
    }

    /// Loop settings of the config observer
    pub fn config_observer_controller(&self) -> controller::Config {
        self.controller_config(self.timing.config_observer_resync_seconds)
    }

    /// Loop settings of the workload synchronizer
    pub fn workload_controller(&self) -> controller::Config {
        self.controller_config(self.timing.workload_resync_seconds)
    }
}

/// Splits `group/version`
pub(crate) fn split_group_version(gv: &str) -> Option<(&str, &str)> {
    match gv.split_once('/') {
        Some((group, version)) if !group.is_empty() && !version.is_empty() && !version.contains('/') => {
            Some((group, version))
        }
        _ => None,
    }
}
