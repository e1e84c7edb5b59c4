//! Merging live cluster facts into the persisted desired-state document
//!
//! Every [`Observer`] reads one external fact and contributes the fragment of the document it
//! owns. The fragments are deep merged and persisted as `spec.observedConfig` whenever the result
//! differs from what is stored.
//!
//! Observers run in a new random order each cycle. Merging resolves nothing: if two observers wrote
//! the same key path, whichever ran last would win. Overlapping ownership is therefore rejected when
//! the [`ConfigObserver`] is built, and the random order keeps order-dependent observers from going
//! unnoticed.
//!
//! An observer that cannot read its fact must never truncate the document. It either falls back
//! to the previous value of the paths it owns ([`ConfigFragment::fallback`]) or, when its source
//! object is simply not there yet, keeps the previous value without reporting an error.
use crate::{
    client::{Listers, OperatorClient},
    config::OperatorConfig,
    encryption::{RevisionLabelPodDeployer, UnionDeployer},
    status::{update_observed_config, update_status},
    Error, Result,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use operator_core::{
    conditions::set_condition, Aggregate, DesiredStateDocument, ManagementState, OperatorCondition,
};
use operator_runtime::{events::Recorder, Action, Reconciler};
use rand::seq::SliceRandom;
use serde_json::Value;
use std::sync::Arc;

pub mod observers;

/// Condition reporting that some observer failed in the last cycle
pub const CONFIG_OBSERVATION_ERROR: &str = "ConfigObservationError";

/// Everything an observer may read
pub struct ObserverContext<'a> {
    /// Cached cluster state
    pub listers: &'a Listers,
    /// Operator configuration
    pub config: &'a OperatorConfig,
    /// Where change events go
    pub recorder: &'a Arc<dyn Recorder>,
}

impl ObserverContext<'_> {
    /// Looks up a config map in the cache
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<Arc<ConfigMap>> {
        self.listers.config_maps.get_namespaced(namespace, name)
    }

    /// Publishes `reason` when the value at `path` changed from a non-empty previous value
    ///
    /// First population from nothing stays silent, so bootstrapping a cluster does not flood events.
    pub fn report_change(
        &self,
        reason: &str,
        existing: &DesiredStateDocument,
        observed: &DesiredStateDocument,
        path: &[&str],
    ) {
        let previous = existing.nested_value(path).filter(|v| !is_blank(v));
        let current = observed.nested_value(path);
        if let Some(previous) = previous {
            if Some(previous) != current {
                self.recorder.event(
                    reason,
                    format!(
                        "{} changed from {} to {}",
                        path.join("."),
                        previous,
                        current.map_or_else(|| "<none>".to_string(), Value::to_string)
                    ),
                );
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// The contribution of one observer to the document
#[derive(Debug, Default)]
pub struct ConfigFragment {
    /// The paths this observer owns, with their new values
    pub config: DesiredStateDocument,
    /// Problems met while observing
    pub errors: Vec<Error>,
}

impl ConfigFragment {
    /// A successful observation
    pub fn observed(config: DesiredStateDocument) -> Self {
        Self {
            config,
            errors: Vec::new(),
        }
    }

    /// The previous values of `paths`, together with whatever went wrong
    pub fn fallback(existing: &DesiredStateDocument, paths: &[&[&str]], errors: Vec<Error>) -> Self {
        Self {
            config: existing.extract(paths),
            errors,
        }
    }
}

/// Contributes one fragment of the desired-state document
pub trait Observer: Send + Sync {
    /// A short name, used in logs
    fn name(&self) -> &'static str;

    /// The key paths this observer writes; no other observer may write them or anything below
    fn owned_paths(&self) -> &'static [&'static [&'static str]];

    /// Observes the current fact
    ///
    /// `existing` is the document as currently persisted. The result must only contain
    /// [`owned_paths`](Observer::owned_paths).
    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment;
}

/// The config observer controller
pub struct ConfigObserver {
    observers: Vec<Box<dyn Observer>>,
    client: Arc<dyn OperatorClient>,
    listers: Listers,
    config: Arc<OperatorConfig>,
    recorder: Arc<dyn Recorder>,
}

impl std::fmt::Debug for ConfigObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigObserver")
            .field("observers", &self.observers.iter().map(|o| o.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn paths_overlap(a: &[&str], b: &[&str]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

impl ConfigObserver {
    /// A controller running `observers`
    ///
    /// Fails if two observers claim the same key path, or one claims a path below another's.
    pub fn new(
        observers: Vec<Box<dyn Observer>>,
        client: Arc<dyn OperatorClient>,
        listers: Listers,
        config: Arc<OperatorConfig>,
        recorder: Arc<dyn Recorder>,
    ) -> Result<Self> {
        for (i, a) in observers.iter().enumerate() {
            for b in &observers[i + 1..] {
                for pa in a.owned_paths() {
                    if let Some(pb) = b.owned_paths().iter().find(|pb| paths_overlap(pa, pb)) {
                        return Err(Error::InvalidConfig(format!(
                            "observers {} and {} both write {} / {}",
                            a.name(),
                            b.name(),
                            pa.join("."),
                            pb.join(".")
                        )));
                    }
                }
            }
        }
        Ok(Self {
            observers,
            client,
            listers,
            config,
            recorder,
        })
    }

    /// A controller running every built-in observer
    pub fn with_default_observers(
        client: Arc<dyn OperatorClient>,
        listers: Listers,
        config: Arc<OperatorConfig>,
        recorder: Arc<dyn Recorder>,
    ) -> Result<Self> {
        let deployer = UnionDeployer::new(vec![Box::new(RevisionLabelPodDeployer::new(
            &listers,
            config.encryption.clone(),
        ))]);
        Self::new(observers::all(deployer), client, listers, config, recorder)
    }

    /// Runs the observers in `order` against `existing` and merges their fragments
    ///
    /// `order` holds indices into the observers and must be a permutation of them.
    pub fn observe(&self, existing: &DesiredStateDocument, order: &[usize]) -> (DesiredStateDocument, Aggregate) {
        let ctx = ObserverContext {
            listers: &self.listers,
            config: &self.config,
            recorder: &self.recorder,
        };
        let mut merged = DesiredStateDocument::new();
        let mut errors = Aggregate::new();
        for observer in order.iter().filter_map(|&i| self.observers.get(i)) {
            let fragment = observer.observe(&ctx, existing);
            if !fragment.errors.is_empty() {
                tracing::warn!(
                    observer = observer.name(),
                    errors = fragment.errors.len(),
                    "observer reported errors"
                );
            }
            merged.merge(&fragment.config);
            for err in fragment.errors {
                errors.push(err);
            }
        }
        (merged, errors)
    }

    fn random_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.observers.len()).collect();
        order.shuffle(&mut rand::rng());
        order
    }
}

#[async_trait]
impl Reconciler for ConfigObserver {
    type Error = Error;

    fn name(&self) -> &str {
        "config-observer"
    }

    async fn reconcile(&self) -> Result<Action> {
        let operator = self.client.get().await?;
        if operator.spec.management_state != ManagementState::Managed {
            tracing::debug!(state = ?operator.spec.management_state, "not managed, skipping observation");
            return Ok(Action::await_change());
        }

        let existing = DesiredStateDocument::from_value(operator.spec.observed_config)?;
        let order = self.random_order();
        let (observed, mut errors) = self.observe(&existing, &order);

        if observed != existing {
            match update_observed_config(&*self.client, &observed).await {
                Ok((previous, true)) => {
                    let changed = previous.diff(&observed);
                    tracing::info!(?changed, "observed config changed");
                    self.recorder.event(
                        "ObservedConfigChanged",
                        format!("Writing updated observed config: {}", changed.join(", ")),
                    );
                }
                Ok((_, false)) => {}
                Err(err) => {
                    self.recorder
                        .warning("ObservedConfigWriteError", format!("Failed to write observed config: {err}"));
                    errors.push(err);
                }
            }
        }

        let condition = if errors.is_empty() {
            OperatorCondition::new(CONFIG_OBSERVATION_ERROR, false)
        } else {
            OperatorCondition::new(CONFIG_OBSERVATION_ERROR, true)
                .reason("Error")
                .message(errors.to_string())
        };
        update_status(&*self.client, |status| set_condition(&mut status.conditions, condition.clone())).await?;

        errors.into_result()?;
        Ok(Action::await_change())
    }
}
