//! The built-in observers, one per cluster fact
use super::Observer;
use crate::encryption::UnionDeployer;
use k8s_openapi::api::core::v1::ConfigMap;

mod encryption;
mod etcd;
mod images;
mod ingress;
mod project;

pub use encryption::{EncryptionObserver, ENCRYPTION_PROVIDER_CONFIG};
pub use etcd::{EtcdObserver, STORAGE_URLS};
pub use images::{ImagesObserver, EXTERNAL_REGISTRY_HOSTNAMES, INTERNAL_REGISTRY_HOSTNAME};
pub use ingress::{IngressObserver, ROUTING_SUBDOMAIN};
pub use project::{ProjectObserver, PROJECT_REQUEST_MESSAGE, PROJECT_REQUEST_TEMPLATE};

/// Every built-in observer, encryption driven by `deployer`
pub fn all(deployer: UnionDeployer) -> Vec<Box<dyn Observer>> {
    vec![
        Box::new(EtcdObserver),
        Box::new(ImagesObserver),
        Box::new(IngressObserver),
        Box::new(ProjectObserver),
        Box::new(EncryptionObserver::new(deployer)),
    ]
}

/// The value under `key`, if set and not empty
fn data_value<'a>(cm: &'a ConfigMap, key: &str) -> Option<&'a str> {
    cm.data
        .as_ref()?
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}
