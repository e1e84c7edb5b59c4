//! Both controllers of the operator, sharing one set of collaborators
use crate::{
    client::{Listers, OperatorClient},
    config::OperatorConfig,
    configobserver::ConfigObserver,
    workload::{Appliers, WorkloadSynchronizer},
    Result,
};
use futures::Stream;
use kube_core::Resource;
use operator_runtime::{events::Recorder, Controller, NamespaceFilter, QueueHandle, WatchEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the controllers read from and write to
#[derive(Clone)]
pub struct Collaborators {
    /// The operator resource
    pub client: Arc<dyn OperatorClient>,
    /// Writes of the workload synchronizer
    pub appliers: Appliers,
    /// Cached cluster state
    pub listers: Listers,
    /// Audit events
    pub recorder: Arc<dyn Recorder>,
}

/// The config observer and the workload synchronizer
///
/// The two only talk through the operator resource: the observer writes `spec.observedConfig`,
/// the synchronizer deploys whatever is there.
pub struct Operator {
    config_observer: Controller<ConfigObserver>,
    workload: Controller<WorkloadSynchronizer>,
    filter: NamespaceFilter,
}

impl Operator {
    /// Builds both controllers from a validated `config`
    pub fn new(config: OperatorConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let filter = config.namespace_filter();
        let config = Arc::new(config);
        let Collaborators {
            client,
            appliers,
            listers,
            recorder,
        } = collaborators;

        let observer = ConfigObserver::with_default_observers(
            client.clone(),
            listers.clone(),
            config.clone(),
            recorder.clone(),
        )?;
        let workload = WorkloadSynchronizer::new(client, appliers, listers, config.clone(), recorder);
        Ok(Self {
            config_observer: Controller::new(observer, config.config_observer_controller()),
            workload: Controller::new(workload, config.workload_controller()),
            filter,
        })
    }

    /// Queues a config observation
    pub fn config_observer_queue(&self) -> QueueHandle<&'static str> {
        self.config_observer.queue()
    }

    /// Queues a workload sync
    pub fn workload_queue(&self) -> QueueHandle<&'static str> {
        self.workload.queue()
    }

    /// Re-observes the config on watch events from the interesting namespaces
    #[must_use]
    pub fn observe_on<K, S>(mut self, events: S) -> Self
    where
        K: Resource + Send + 'static,
        S: Stream<Item = WatchEvent<K>> + Send + 'static,
    {
        self.config_observer = self.config_observer.watches(events, self.filter.clone());
        self
    }

    /// Re-syncs the workload on watch events from the interesting namespaces
    #[must_use]
    pub fn sync_on<K, S>(mut self, events: S) -> Self
    where
        K: Resource + Send + 'static,
        S: Stream<Item = WatchEvent<K>> + Send + 'static,
    {
        self.workload = self.workload.watches(events, self.filter.clone());
        self
    }

    /// Runs both controllers until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("starting operator");
        futures::join!(
            self.config_observer.run(shutdown.clone()),
            self.workload.run(shutdown)
        );
        tracing::info!("operator stopped");
    }
}
