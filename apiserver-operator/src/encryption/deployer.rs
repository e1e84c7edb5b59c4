use super::config::decode;
use crate::{client::Listers, config::EncryptionSource, Error, Result};
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube_core::ResourceExt;
use operator_runtime::Store;
use std::collections::BTreeMap;

/// What a source believes is deployed
#[derive(Clone, Debug, PartialEq)]
pub enum Convergence {
    /// Every replica behind the source runs the same configuration
    ///
    /// `None` means the replicas run without encryption configuration.
    Converged(Option<Secret>),
    /// The replicas disagree or are still rolling out
    NotConverged,
}

impl Convergence {
    /// Whether this is [`Convergence::Converged`]
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged(_))
    }
}

/// A source's report for the current cycle; an error is distinct from "not converged yet"
pub type ConvergenceReport = Result<Convergence>;

/// A source of deployed encryption configuration
pub trait Deployer: Send + Sync {
    /// Whether this source takes part at all
    fn is_enabled(&self) -> bool {
        true
    }

    /// The configuration deployed right now, recomputed on every call
    fn deployed_encryption_config(&self) -> ConvergenceReport;
}

/// Reduces several [`Deployer`]s to one verdict
///
/// Nothing is cached between calls: every [`evaluate`](UnionDeployer::evaluate) reads all
/// sources afresh.
#[derive(Default)]
pub struct UnionDeployer {
    sources: Vec<Box<dyn Deployer>>,
}

impl std::fmt::Debug for UnionDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionDeployer")
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl UnionDeployer {
    /// A union over `sources`
    pub fn new(sources: Vec<Box<dyn Deployer>>) -> Self {
        Self { sources }
    }

    /// The aggregate verdict over every enabled source
    ///
    /// * any source failing fails the union with the first error
    /// * any source not converged leaves the union not converged
    /// * all sources without configuration (or no enabled source) is converged without configuration
    /// * a mix of sources with and without configuration is not converged
    /// * otherwise the union is converged iff every configuration lists the same resources as the first
    pub fn evaluate(&self) -> ConvergenceReport {
        let mut payloads = Vec::new();
        let mut enabled = 0;
        for source in self.sources.iter().filter(|s| s.is_enabled()) {
            enabled += 1;
            match source.deployed_encryption_config()? {
                Convergence::NotConverged => return Ok(Convergence::NotConverged),
                Convergence::Converged(None) => {}
                Convergence::Converged(Some(secret)) => payloads.push(secret),
            }
        }

        let Some(golden) = payloads.first() else {
            return Ok(Convergence::Converged(None));
        };
        if payloads.len() != enabled {
            tracing::debug!(
                with_config = payloads.len(),
                sources = enabled,
                "sources disagree on whether encryption is configured"
            );
            return Ok(Convergence::NotConverged);
        }

        let golden_config = decode(golden)?;
        for other in &payloads[1..] {
            if decode(other)?.resources != golden_config.resources {
                tracing::debug!(
                    golden = %golden.name_any(),
                    other = %other.name_any(),
                    "deployed encryption configurations differ"
                );
                return Ok(Convergence::NotConverged);
            }
        }
        Ok(Convergence::Converged(Some(golden.clone())))
    }
}

impl Deployer for UnionDeployer {
    fn is_enabled(&self) -> bool {
        self.sources.iter().any(|s| s.is_enabled())
    }

    fn deployed_encryption_config(&self) -> ConvergenceReport {
        self.evaluate()
    }
}

/// Reads the deployed configuration from the revision the replica pods run
///
/// All running replicas must carry the same revision label. The configuration of revision `N` is the
/// secret `<prefix>-N`; its absence means the revision runs without encryption.
#[derive(Clone, Debug)]
pub struct RevisionLabelPodDeployer {
    pods: Store<Pod>,
    secrets: Store<Secret>,
    source: EncryptionSource,
}

impl RevisionLabelPodDeployer {
    /// A source reading pods and secrets from `listers`
    pub fn new(listers: &Listers, source: EncryptionSource) -> Self {
        Self {
            pods: listers.pods.clone(),
            secrets: listers.secrets.clone(),
            source,
        }
    }

    fn deployed_revision(&self) -> Result<Option<String>> {
        let pods = self
            .pods
            .list_matching(&self.source.namespace, &self.source.pod_selector);
        let mut revisions = BTreeMap::<String, Vec<String>>::new();
        for pod in pods.iter().filter(|pod| pod.metadata.deletion_timestamp.is_none()) {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("Pending");
            match phase {
                "Running" => {}
                // Terminated replicas run nothing
                "Succeeded" | "Failed" => continue,
                _ => {
                    tracing::debug!(pod = %pod.name_any(), phase, "replica not running yet");
                    return Ok(None);
                }
            }
            let Some(revision) = pod.labels().get(&self.source.revision_label) else {
                return Err(Error::Core(operator_core::Error::InvalidObject(format!(
                    "pod {}/{} is missing the {:?} label",
                    self.source.namespace,
                    pod.name_any(),
                    self.source.revision_label
                ))));
            };
            revisions.entry(revision.clone()).or_default().push(pod.name_any());
        }

        match revisions.len() {
            1 => Ok(revisions.into_keys().next()),
            0 => {
                tracing::debug!(namespace = %self.source.namespace, "no running replicas");
                Ok(None)
            }
            _ => {
                tracing::debug!(?revisions, "replicas run different revisions");
                Ok(None)
            }
        }
    }
}

impl Deployer for RevisionLabelPodDeployer {
    fn is_enabled(&self) -> bool {
        self.source.enabled
    }

    fn deployed_encryption_config(&self) -> ConvergenceReport {
        let Some(revision) = self.deployed_revision()? else {
            return Ok(Convergence::NotConverged);
        };
        let name = format!("{}-{revision}", self.source.secret_prefix);
        let secret = self.secrets.get_namespaced(&self.source.namespace, &name);
        Ok(Convergence::Converged(secret.map(|s| (*s).clone())))
    }
}

/// A source with a fixed answer
#[cfg(test)]
#[derive(Clone, Debug)]
pub(crate) struct StaticDeployer {
    enabled: bool,
    answer: StaticAnswer,
}

#[cfg(test)]
#[derive(Clone, Debug)]
enum StaticAnswer {
    Converged(Option<Secret>),
    NotConverged,
    Failing(String),
}

#[cfg(test)]
impl StaticDeployer {
    /// Always converged on `secret`
    pub(crate) fn converged(secret: Option<Secret>) -> Self {
        Self {
            enabled: true,
            answer: StaticAnswer::Converged(secret),
        }
    }

    /// Never converged
    pub(crate) fn not_converged() -> Self {
        Self {
            enabled: true,
            answer: StaticAnswer::NotConverged,
        }
    }

    /// Always failing with `message`
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            enabled: true,
            answer: StaticAnswer::Failing(message.to_owned()),
        }
    }

    /// The same answer, but excluded from every union
    #[must_use]
    pub(crate) fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
impl Deployer for StaticDeployer {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn deployed_encryption_config(&self) -> ConvergenceReport {
        match &self.answer {
            StaticAnswer::Converged(secret) => Ok(Convergence::Converged(secret.clone())),
            StaticAnswer::NotConverged => Ok(Convergence::NotConverged),
            StaticAnswer::Failing(message) => Err(Error::Core(operator_core::Error::InvalidObject(message.clone()))),
        }
    }
}
