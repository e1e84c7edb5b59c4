//! Construction of the operand deployment
//!
//! The deployment carries the digests of everything it mounts as annotations, on itself and on its
//! pod template. The next cycle reads them back from the applied object to decide whether a
//! dependency changed since the last rollout.
//!
//! Pods are labelled with the revision they run. The encryption configuration is not mounted
//! directly: every revision mounts its own snapshot `<prefix>-<revision>`, taken when the revision
//! is cut, so the label tells exactly which configuration a replica runs.
use super::operand::operand_config_path;
use crate::{client::Listers, config::OperatorConfig, resources::ApiServerOperator, Result};
use k8s_openapi::{
    api::{apps::v1::Deployment, core::v1::Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use operator_core::DependencyHash;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Name of the operand container
pub const CONTAINER_NAME: &str = "openshift-apiserver";

const PROXY_KEYS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// Proxy environment of the operand, from the cluster proxy config map
///
/// Unset and empty keys are left out.
pub fn proxy_env(listers: &Listers, config: &OperatorConfig) -> Vec<(String, String)> {
    let Some(cm) = listers
        .config_maps
        .get_namespaced(&config.config_namespace, &config.objects.proxy_config)
    else {
        return Vec::new();
    };
    let data = cm.data.clone().unwrap_or_default();
    PROXY_KEYS
        .iter()
        .filter_map(|key| {
            data.get(*key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (key.to_string(), v.to_owned()))
        })
        .collect()
}

/// Digests of every config map and secret the operand mounts
///
/// Missing objects hash to the empty digest, so their later appearance counts as a change.
pub fn dependency_hash(listers: &Listers, config: &OperatorConfig) -> DependencyHash {
    let ns = &config.target_namespace;
    let mut hash = DependencyHash::new();
    for name in &config.objects.dependency_config_maps {
        hash.insert_config_map(ns, name, listers.config_maps.get_namespaced(ns, name).as_deref());
    }
    for name in &config.objects.dependency_secrets {
        hash.insert_secret(ns, name, listers.secrets.get_namespaced(ns, name).as_deref());
    }
    hash
}

/// The dependency digests recorded on an applied deployment
pub fn recorded_hash(deployment: &Deployment) -> DependencyHash {
    deployment
        .metadata
        .annotations
        .as_ref()
        .map(DependencyHash::from_annotations)
        .unwrap_or_default()
}

fn selector_labels(config: &OperatorConfig) -> BTreeMap<String, String> {
    let mut labels = config.encryption.pod_selector.clone();
    labels.insert("app".into(), config.deployment_name.clone());
    labels
}

/// Name of the encryption configuration snapshot of `revision`
pub fn encryption_snapshot_name(config: &OperatorConfig, revision: i64) -> String {
    format!("{}-{revision}", config.encryption.secret_prefix)
}

/// A copy of the current encryption configuration for `revision`
///
/// `None` when no encryption configuration exists, in which case the revision runs without one.
pub fn encryption_snapshot(listers: &Listers, config: &OperatorConfig, revision: i64) -> Option<Secret> {
    let ns = &config.target_namespace;
    let source = listers.secrets.get_namespaced(ns, &config.encryption.secret_prefix)?;
    Some(Secret {
        metadata: ObjectMeta {
            name: Some(encryption_snapshot_name(config, revision)),
            namespace: Some(ns.clone()),
            labels: source.metadata.labels.clone(),
            ..ObjectMeta::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        ..Secret::default()
    })
}

/// The deployment of `revision` for the current operator resource
pub fn build(
    config: &OperatorConfig,
    operator: &ApiServerOperator,
    revision: i64,
    hash: &DependencyHash,
    proxy: &[(String, String)],
) -> Result<Deployment> {
    let selector = selector_labels(config);
    let mut pod_labels = selector.clone();
    pod_labels.insert(config.encryption.revision_label.clone(), revision.to_string());
    let annotations = hash.to_annotations();

    let mut volumes = Vec::<Value>::new();
    let mut mounts = Vec::<Value>::new();
    for name in &config.objects.dependency_config_maps {
        volumes.push(json!({"name": name, "configMap": {"name": name}}));
        mounts.push(json!({"name": name, "mountPath": format!("/var/run/configmaps/{name}")}));
    }
    for name in &config.objects.dependency_secrets {
        let volume = if *name == config.encryption.secret_prefix {
            json!({"name": name, "secret": {
                "secretName": encryption_snapshot_name(config, revision),
                "optional": true,
            }})
        } else {
            json!({"name": name, "secret": {"secretName": name}})
        };
        volumes.push(volume);
        mounts.push(json!({"name": name, "mountPath": format!("/var/run/secrets/{name}")}));
    }
    let env: Vec<Value> = proxy.iter().map(|(k, v)| json!({"name": k, "value": v})).collect();

    Ok(serde_json::from_value(json!({
        "metadata": {
            "name": config.deployment_name,
            "namespace": config.target_namespace,
            "labels": selector,
            "annotations": annotations,
        },
        "spec": {
            "replicas": config.replicas,
            "selector": {"matchLabels": selector},
            "strategy": {
                "type": "RollingUpdate",
                "rollingUpdate": {"maxUnavailable": 1, "maxSurge": 0},
            },
            "template": {
                "metadata": {
                    "name": config.deployment_name,
                    "labels": pod_labels,
                    "annotations": annotations,
                },
                "spec": {
                    "serviceAccountName": config.objects.service_account,
                    "priorityClassName": "system-node-critical",
                    "containers": [{
                        "name": CONTAINER_NAME,
                        "image": config.image,
                        "args": [
                            format!("--config={}", operand_config_path(config)),
                            format!("-v={}", operator.spec.log_level.verbosity()),
                        ],
                        "env": env,
                        "ports": [{"name": "https", "containerPort": 8443}],
                        "volumeMounts": mounts,
                        "readinessProbe": {
                            "httpGet": {"scheme": "HTTPS", "port": 8443, "path": "readyz"},
                        },
                    }],
                    "volumes": volumes,
                },
            },
        },
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeCluster;
    use operator_core::LogLevel;

    fn container(deployment: &Deployment) -> &k8s_openapi::api::core::v1::Container {
        &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    #[test]
    fn carries_image_verbosity_and_proxy() {
        let cluster = FakeCluster::new();
        cluster.put_config_map("openshift-config", "proxy-config", &[
            ("HTTPS_PROXY", "https://proxy.example.com:3128"),
            ("NO_PROXY", ".cluster.local"),
            ("HTTP_PROXY", ""),
        ]);
        let mut operator = ApiServerOperator::new("cluster");
        operator.spec.log_level = LogLevel::Debug;
        operator.metadata.generation = Some(9);

        let proxy = proxy_env(&cluster.listers, &cluster.config);
        let d = build(&cluster.config, &operator, 4, &DependencyHash::new(), &proxy).unwrap();
        let c = container(&d);
        assert_eq!(c.image.as_deref(), Some(cluster.config.image.as_str()));
        assert_eq!(c.args.as_ref().unwrap(), &vec![
            "--config=/var/run/configmaps/config/config.yaml".to_string(),
            "-v=4".to_string(),
        ]);
        let env: Vec<_> = c.env.iter().flatten().map(|e| e.name.as_str()).collect();
        assert_eq!(env, vec!["HTTPS_PROXY", "NO_PROXY"]);

        let labels = d.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["revision"], "4");
        assert_eq!(labels["apiserver"], "true");
    }

    #[test]
    fn hash_annotations_round_trip_through_the_deployment() {
        let cluster = FakeCluster::new();
        cluster.put_config_map("openshift-apiserver", "etcd-serving-ca", &[("ca-bundle.crt", "pem")]);
        let hash = dependency_hash(&cluster.listers, &cluster.config);
        let d = build(&cluster.config, &ApiServerOperator::new("cluster"), 1, &hash, &[]).unwrap();
        assert_eq!(recorded_hash(&d), hash);
        assert_ne!(hash.get("openshift-apiserver.etcd-serving-ca.configmap"), Some(""));
        assert_eq!(hash.get("openshift-apiserver.serving-cert.secret"), Some(""));

        cluster.put_config_map("openshift-apiserver", "etcd-serving-ca", &[("ca-bundle.crt", "rotated")]);
        let rotated = dependency_hash(&cluster.listers, &cluster.config);
        assert_eq!(rotated.changed_from(&hash), vec!["openshift-apiserver.etcd-serving-ca.configmap"]);
    }

    #[test]
    fn revisions_mount_their_own_encryption_snapshot() {
        let cluster = FakeCluster::new();
        let d = build(&cluster.config, &ApiServerOperator::new("cluster"), 5, &DependencyHash::new(), &[]).unwrap();
        let volumes = d.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let encryption = volumes.iter().find(|v| v.name == "encryption-config").unwrap();
        let secret = encryption.secret.as_ref().unwrap();
        assert_eq!(secret.secret_name.as_deref(), Some("encryption-config-5"));
        assert_eq!(secret.optional, Some(true));

        assert!(encryption_snapshot(&cluster.listers, &cluster.config, 5).is_none());
        cluster.put_secret(crate::encryption::encryption_secret(
            "openshift-apiserver",
            "encryption-config",
            &["secrets"],
            "YQ==",
        ));
        let snapshot = encryption_snapshot(&cluster.listers, &cluster.config, 5).unwrap();
        assert_eq!(snapshot.metadata.name.as_deref(), Some("encryption-config-5"));
        let source = cluster.listers.secrets.get_namespaced("openshift-apiserver", "encryption-config").unwrap();
        assert_eq!(snapshot.data, source.data);
    }
}
