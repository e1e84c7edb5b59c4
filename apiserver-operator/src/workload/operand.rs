//! The operand's static prerequisites and its rendered configuration
use crate::{config::OperatorConfig, Result};
use k8s_openapi::{
    api::core::v1::{ConfigMap, Namespace, Service, ServiceAccount},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use operator_core::{DesiredStateDocument, OperatorSpec};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Key of the rendered configuration in the operand config map
pub const OPERAND_CONFIG_KEY: &str = "config.yaml";

/// Where the operand config map is mounted
pub fn operand_config_path(config: &OperatorConfig) -> String {
    format!("/var/run/configmaps/{}/{OPERAND_CONFIG_KEY}", config.objects.operand_config)
}

fn meta(config: &OperatorConfig, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some(config.target_namespace.clone()),
        ..ObjectMeta::default()
    }
}

/// The target namespace
pub fn namespace(config: &OperatorConfig) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(config.target_namespace.clone()),
            labels: Some(BTreeMap::from([(
                "openshift.io/cluster-monitoring".to_string(),
                "true".to_string(),
            )])),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

/// The service account the operand runs as
pub fn service_account(config: &OperatorConfig) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(config, &config.objects.service_account),
        ..ServiceAccount::default()
    }
}

/// The service in front of the operand replicas
pub fn service(config: &OperatorConfig) -> Result<Service> {
    let selector: BTreeMap<&str, &str> = config
        .encryption
        .pod_selector
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    Ok(serde_json::from_value(json!({
        "metadata": {
            "name": config.objects.service,
            "namespace": config.target_namespace,
        },
        "spec": {
            "selector": selector,
            "ports": [{"name": "https", "port": 443, "targetPort": 8443}],
        },
    }))?)
}

/// Settings every operand gets unless observed or overridden
fn defaults() -> Value {
    json!({
        "apiVersion": "openshiftcontrolplane.config.openshift.io/v1",
        "kind": "OpenShiftAPIServerConfig",
        "servingInfo": {
            "bindAddress": "0.0.0.0:8443",
            "certFile": "/var/run/secrets/serving-cert/tls.crt",
            "keyFile": "/var/run/secrets/serving-cert/tls.key",
        },
        "storageConfig": {
            "ca": "/var/run/configmaps/etcd-serving-ca/ca-bundle.crt",
            "certFile": "/var/run/secrets/etcd-client/tls.crt",
            "keyFile": "/var/run/secrets/etcd-client/tls.key",
        },
    })
}

/// Defaults, then the observed config, then the unsupported overrides, each merged over the last
pub fn render(spec: &OperatorSpec) -> Result<DesiredStateDocument> {
    let mut rendered = DesiredStateDocument::from_value(defaults())?;
    rendered.merge(&DesiredStateDocument::from_value(spec.observed_config.clone())?);
    rendered.merge(&DesiredStateDocument::from_value(
        spec.unsupported_config_overrides.clone(),
    )?);
    Ok(rendered)
}

/// The config map carrying `rendered` as YAML
pub fn config_map(config: &OperatorConfig, rendered: &DesiredStateDocument) -> Result<ConfigMap> {
    Ok(ConfigMap {
        metadata: meta(config, &config.objects.operand_config),
        data: Some(BTreeMap::from([(
            OPERAND_CONFIG_KEY.to_string(),
            serde_yaml::to_string(rendered)?,
        )])),
        ..ConfigMap::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_json_diff::assert_json_include;

    #[test]
    fn overrides_win_over_observed_over_defaults() {
        let spec = OperatorSpec {
            observed_config: json!({
                "storageConfig": {"urls": ["https://10.0.0.1:2379"]},
                "routingConfig": {"subdomain": "apps.example.com"},
            }),
            unsupported_config_overrides: json!({"routingConfig": {"subdomain": "apps.override.com"}}),
            ..OperatorSpec::default()
        };
        let rendered = render(&spec).unwrap().into_value();
        assert_json_include!(
            actual: rendered,
            expected: json!({
                "kind": "OpenShiftAPIServerConfig",
                "storageConfig": {
                    "urls": ["https://10.0.0.1:2379"],
                    "certFile": "/var/run/secrets/etcd-client/tls.crt",
                },
                "routingConfig": {"subdomain": "apps.override.com"},
            })
        );
    }

    #[test]
    fn config_map_holds_yaml() {
        let config = OperatorConfig::default();
        let rendered = render(&OperatorSpec::default()).unwrap();
        let cm = config_map(&config, &rendered).unwrap();
        let yaml = &cm.data.unwrap()[OPERAND_CONFIG_KEY];
        assert!(yaml.contains("kind: OpenShiftAPIServerConfig"), "{yaml}");
        assert_eq!(serde_yaml::from_str::<DesiredStateDocument>(yaml).unwrap(), rendered);
        assert_eq!(operand_config_path(&config), "/var/run/configmaps/config/config.yaml");
    }

    #[test]
    fn service_selects_operand_pods() {
        let svc = service(&OperatorConfig::default()).unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.selector.unwrap()["apiserver"], "true");
        assert_eq!(spec.ports.unwrap()[0].port, 443);
    }
}
