//! Content digests of the objects a workload depends on
//!
//! The digests are only ever compared for equality. They are carried as annotations on the
//! applied workload object, so a restarted operator can tell whether a dependency changed since
//! the last rollout without any storage of its own.
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Prefix of the annotations holding dependency digests
pub const DEPENDENCY_HASH_ANNOTATION_PREFIX: &str = "operator.apiserver.k8s.io/dep-";

/// Map of dependency key to content digest
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyHash(BTreeMap<String, String>);

/// Kind of an object a workload can depend on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    /// A `v1/ConfigMap`
    ConfigMap,
    /// A `v1/Secret`
    Secret,
}

impl DependencyKind {
    fn as_str(self) -> &'static str {
        match self {
            DependencyKind::ConfigMap => "configmap",
            DependencyKind::Secret => "secret",
        }
    }
}

/// Key under which the digest of `kind` `namespace/name` is stored
pub fn dependency_key(kind: DependencyKind, namespace: &str, name: &str) -> String {
    format!("{namespace}.{name}.{}", kind.as_str())
}

impl DependencyHash {
    /// An empty hash map
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the digest of a config map; a missing config map records an empty digest
    pub fn insert_config_map(&mut self, namespace: &str, name: &str, cm: Option<&ConfigMap>) {
        let digest = cm.map(config_map_digest).unwrap_or_default();
        self.0
            .insert(dependency_key(DependencyKind::ConfigMap, namespace, name), digest);
    }

    /// Records the digest of a secret; a missing secret records an empty digest
    pub fn insert_secret(&mut self, namespace: &str, name: &str, secret: Option<&Secret>) {
        let digest = secret.map(secret_digest).unwrap_or_default();
        self.0
            .insert(dependency_key(DependencyKind::Secret, namespace, name), digest);
    }

    /// The digest recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates over `(key, digest)` pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether no dependency was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the map as annotations under [`DEPENDENCY_HASH_ANNOTATION_PREFIX`]
    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (format!("{DEPENDENCY_HASH_ANNOTATION_PREFIX}{k}"), v.clone()))
            .collect()
    }

    /// Reads back a map written by [`DependencyHash::to_annotations`], ignoring other annotations
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        Self(
            annotations
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(DEPENDENCY_HASH_ANNOTATION_PREFIX)
                        .map(|key| (key.to_owned(), v.clone()))
                })
                .collect(),
        )
    }

    /// The sorted keys whose digest differs between `previous` and `self`
    ///
    /// Keys present on only one side count as changed.
    pub fn changed_from(&self, previous: &DependencyHash) -> Vec<String> {
        let mut changed: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| previous.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(previous.0.keys().filter(|k| !self.0.contains_key(*k)).cloned());
        changed.sort();
        changed
    }
}

fn digest_entries<'a>(entries: impl Iterator<Item = (&'a str, &'a [u8])>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value);
    }
    format!("{:x}", hasher.finalize())
}

/// Digest over the data and binary data of a config map
pub fn config_map_digest(cm: &ConfigMap) -> String {
    let data = cm.data.iter().flatten().map(|(k, v)| (k.as_str(), v.as_bytes()));
    let binary = cm
        .binary_data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.0.as_slice()));
    digest_entries(data.chain(binary))
}

/// Digest over the data of a secret
pub fn secret_digest(secret: &Secret) -> String {
    let data = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.0.as_slice()));
    let string_data = secret
        .string_data
        .iter()
        .flatten()
        .map(|(k, v)| (k.as_str(), v.as_bytes()));
    digest_entries(data.chain(string_data))
}
