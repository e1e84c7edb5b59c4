//! Runs a [`Reconciler`] whenever its single work item is due
//!
//! Every controller instance owns one [`EventQueue`] holding one well-known key, [`SINGLETON_KEY`].
//! The key stands for "the whole desired state", so there is nothing to fan out over: watch
//! events, periodic resyncs and retries all collapse into the same pending item, and exactly one
//! reconcile runs at a time.
use crate::{
    utils::predicate::NamespaceFilter,
    queue::{event_queue_with_backoff, EventQueue, QueueHandle},
    reflector::WatchEvent,
};
use async_trait::async_trait;
use futures::{
    future,
    stream::{BoxStream, SelectAll},
    Stream, StreamExt,
};
use kube_core::Resource;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The one key every controller queues
pub const SINGLETON_KEY: &str = "key";

/// Results of the reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue: Requeue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requeue {
    Never,
    After(Duration),
    RateLimited,
}

impl Action {
    /// Do nothing until a change is observed
    ///
    /// The rate limit of the key is reset.
    #[must_use]
    pub const fn await_change() -> Self {
        Self {
            requeue: Requeue::Never,
        }
    }

    /// Reconcile again after `duration`, even if nothing changes
    ///
    /// The rate limit of the key is reset.
    #[must_use]
    pub const fn requeue(duration: Duration) -> Self {
        Self {
            requeue: Requeue::After(duration),
        }
    }

    /// Reconcile again after the key's rate limited delay
    ///
    /// Use this when the state is not settled yet but nothing failed, for example while waiting
    /// for a rollout to finish. The delay grows exactly as for a failure, but nothing is reported.
    #[must_use]
    pub const fn requeue_rate_limited() -> Self {
        Self {
            requeue: Requeue::RateLimited,
        }
    }

    /// Whether this action schedules another reconcile on its own
    pub fn is_requeue(&self) -> bool {
        self.requeue != Requeue::Never
    }
}

/// The pluggable sync function of a [`Controller`]
///
/// A reconcile must be idempotent and safe to re-run from scratch at any time: it gets no input
/// besides the state it reads from its collaborators.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// The error a failed reconcile reports
    type Error: std::error::Error + Send + Sync + 'static;

    /// A short name, used in logs
    fn name(&self) -> &str;

    /// Drive the world one step closer to the desired state
    async fn reconcile(&self) -> Result<Action, Self::Error>;
}

#[async_trait]
impl<R: Reconciler> Reconciler for Arc<R> {
    type Error = R::Error;

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn reconcile(&self) -> Result<Action, Self::Error> {
        (**self).reconcile().await
    }
}

/// Tunables of a [`Controller`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Queue the key at most once per period, even when no event arrives
    pub resync_period: Option<Duration>,
    /// Delay after the first consecutive failure
    pub base_delay: Duration,
    /// Upper bound of the failure delay
    pub max_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resync_period: None,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl Config {
    /// Queue the key every `period` to heal drift that produces no event
    #[must_use]
    pub fn resync_every(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    /// Bounds of the exponential failure backoff
    #[must_use]
    pub fn backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }
}

type ErrorSink<E> = Box<dyn Fn(&str, &E) + Send + Sync>;

/// A single-worker reconcile loop, see the [module docs](self).
///
/// ```no_run
/// use operator_runtime::controller::{Action, Config, Controller, Reconciler};
/// use tokio_util::sync::CancellationToken;
///
/// struct Noop;
///
/// #[async_trait::async_trait]
/// impl Reconciler for Noop {
///     type Error = std::io::Error;
///
///     fn name(&self) -> &str {
///         "noop"
///     }
///
///     async fn reconcile(&self) -> Result<Action, Self::Error> {
///         Ok(Action::await_change())
///     }
/// }
///
/// # async fn wrapper() {
/// let shutdown = CancellationToken::new();
/// let controller = Controller::new(Noop, Config::default());
/// let queue = controller.queue();
/// tokio::spawn(controller.run(shutdown.clone()));
/// queue.enqueue("key");
/// shutdown.cancel();
/// # }
/// ```
pub struct Controller<R: Reconciler> {
    reconciler: R,
    config: Config,
    handle: QueueHandle<&'static str>,
    queue: EventQueue<&'static str>,
    triggers: SelectAll<BoxStream<'static, ()>>,
    error_sink: Option<ErrorSink<R::Error>>,
}

impl<R: Reconciler> fmt::Debug for Controller<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.reconciler.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: Reconciler> Controller<R> {
    /// Creates a controller driving `reconciler`
    pub fn new(reconciler: R, config: Config) -> Self {
        let (handle, queue) = event_queue_with_backoff(config.base_delay, config.max_delay);
        Self {
            reconciler,
            config,
            handle,
            queue,
            triggers: SelectAll::new(),
            error_sink: None,
        }
    }

    /// A handle collaborators can use to queue the key
    pub fn queue(&self) -> QueueHandle<&'static str> {
        self.handle.clone()
    }

    /// Queue the key whenever `trigger` yields
    #[must_use]
    pub fn trigger_on<S>(mut self, trigger: S) -> Self
    where
        S: Stream + Send + 'static,
    {
        self.triggers.push(trigger.map(|_| ()).boxed());
        self
    }

    /// Queue the key for watch events about objects in namespaces `filter` accepts
    ///
    /// Relists always trigger, since they may carry objects of interest.
    #[must_use]
    pub fn watches<K, S>(self, events: S, filter: NamespaceFilter) -> Self
    where
        K: Resource + Send + 'static,
        S: Stream<Item = WatchEvent<K>> + Send + 'static,
    {
        self.trigger_on(events.filter(move |event| {
            let interesting = match event {
                WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => {
                    filter.matches(obj.meta().namespace.as_deref())
                }
                WatchEvent::Restarted(_) => true,
            };
            future::ready(interesting)
        }))
    }

    /// Queue the key at most once per `period`, in addition to [`Config::resync_period`]
    #[must_use]
    pub fn resync_every(mut self, period: Duration) -> Self {
        self.config.resync_period = Some(period);
        self
    }

    /// Report reconcile errors to `sink` as well as to the log
    #[must_use]
    pub fn error_sink(mut self, sink: impl Fn(&str, &R::Error) + Send + Sync + 'static) -> Self {
        self.error_sink = Some(Box::new(sink));
        self
    }

    /// Run the loop until `shutdown` is cancelled
    ///
    /// The key is queued once on start. A reconcile that is already running when `shutdown` fires
    /// is allowed to finish, but its outcome no longer queues anything.
    pub async fn run(self, shutdown: CancellationToken) {
        let Controller {
            reconciler,
            config,
            handle,
            mut queue,
            mut triggers,
            error_sink,
        } = self;
        let name = reconciler.name().to_owned();
        let mut resync = config.resync_period.map(|period| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        tracing::info!(controller = %name, "starting controller");
        handle.enqueue(SINGLETON_KEY);

        loop {
            let key = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(()) = triggers.next(), if !triggers.is_empty() => {
                    handle.enqueue(SINGLETON_KEY);
                    continue;
                }
                () = tick(resync.as_mut()) => {
                    tracing::trace!(controller = %name, "periodic resync");
                    handle.enqueue(SINGLETON_KEY);
                    continue;
                }
                next = queue.next() => match next {
                    Some(key) => key,
                    None => break,
                },
            };

            let span = tracing::info_span!("reconciling", controller = %name);
            let result = reconciler.reconcile().instrument(span).await;
            if shutdown.is_cancelled() {
                tracing::debug!(controller = %name, "shutdown requested, not requeueing");
                break;
            }

            match result {
                Ok(action) => match action.requeue {
                    Requeue::Never => queue.forget(&key),
                    Requeue::After(delay) => {
                        queue.forget(&key);
                        queue.schedule_after(key, delay);
                    }
                    Requeue::RateLimited => {
                        let delay = queue.add_rate_limited(key);
                        tracing::debug!(controller = %name, ?delay, "not settled yet, requeueing");
                    }
                },
                Err(err) => {
                    let delay = queue.add_rate_limited(key);
                    tracing::error!(controller = %name, error = %err, ?delay, "reconcile failed");
                    if let Some(sink) = &error_sink {
                        sink(&name, &err);
                    }
                }
            }
        }
        tracing::info!(controller = %name, "controller stopped");
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, Config, Controller, Reconciler};
    use crate::{reflector::WatchEvent, utils::predicate::NamespaceFilter};
    use async_trait::async_trait;
    use futures::channel::mpsc;
    use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use parking_lot::Mutex;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tokio::time::{advance, pause, sleep, Instant};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, thiserror::Error)]
    #[error("sync failed")]
    struct SyncFailed;

    /// Replays scripted outcomes and records when each reconcile started
    #[derive(Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<Action, SyncFailed>>>,
        started: Mutex<Vec<Instant>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outcomes: impl IntoIterator<Item = Result<Action, SyncFailed>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn gaps(&self) -> Vec<Duration> {
            self.started.lock().windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl Reconciler for Scripted {
        type Error = SyncFailed;

        fn name(&self) -> &str {
            "scripted"
        }

        async fn reconcile(&self) -> Result<Action, SyncFailed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().push(Instant::now());
            self.outcomes.lock().pop_front().unwrap_or(Ok(Action::await_change()))
        }
    }

    /// The delay queue rounds deadlines up to whole milliseconds, so each gap may overshoot a little
    fn assert_gaps(actual: &[Duration], expected: &[Duration]) {
        assert_eq!(actual.len(), expected.len(), "gaps {actual:?}, expected {expected:?}");
        for (gap, want) in actual.iter().zip(expected) {
            assert!(
                *gap >= *want && *gap <= *want + Duration::from_millis(2),
                "gaps {actual:?}, expected {expected:?}"
            );
        }
    }

    fn config() -> Config {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        Config::default().backoff(Duration::from_secs(1), Duration::from_secs(4))
    }

    #[tokio::test]
    async fn failures_back_off_exponentially_and_reset_on_success() {
        pause();
        let scripted = Scripted::new([
            Err(SyncFailed),
            Err(SyncFailed),
            Err(SyncFailed),
            Err(SyncFailed),
            Ok(Action::await_change()),
        ]);
        let reported = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();
        let controller = Controller::new(scripted.clone(), config()).error_sink({
            let reported = reported.clone();
            move |_, _| {
                reported.fetch_add(1, Ordering::SeqCst);
            }
        });
        let queue = controller.queue();
        let task = tokio::spawn(controller.run(shutdown.clone()));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(scripted.calls(), 5);
        assert_eq!(reported.load(Ordering::SeqCst), 4);
        assert_gaps(&scripted.gaps(), &[
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(4),
        ]);

        // the next failure starts from the base delay again
        scripted.outcomes.lock().extend([Err(SyncFailed), Ok(Action::await_change())]);
        queue.enqueue("key");
        sleep(Duration::from_secs(60)).await;
        assert_eq!(scripted.calls(), 7);
        let gaps = scripted.gaps();
        assert_gaps(&gaps[gaps.len() - 1..], &[Duration::from_secs(1)]);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn events_arriving_together_collapse_into_one_reconcile() {
        pause();
        let scripted = Scripted::new([]);
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded::<()>();
        let controller = Controller::new(scripted.clone(), config()).trigger_on(rx);
        let task = tokio::spawn(controller.run(shutdown.clone()));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scripted.calls(), 1);

        for _ in 0..5 {
            tx.unbounded_send(()).unwrap();
        }
        sleep(Duration::from_millis(10)).await;
        assert!(scripted.calls() >= 2 && scripted.calls() <= 3, "calls: {}", scripted.calls());
        let settled = scripted.calls();
        sleep(Duration::from_secs(10)).await;
        assert_eq!(scripted.calls(), settled);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn watch_events_outside_interesting_namespaces_are_ignored() {
        pause();
        let scripted = Scripted::new([]);
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded::<WatchEvent<ConfigMap>>();
        let controller = Controller::new(scripted.clone(), config())
            .watches(rx, NamespaceFilter::new(["operand-ns"]));
        let task = tokio::spawn(controller.run(shutdown.clone()));
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scripted.calls(), 1);

        let cm = |ns: &str| ConfigMap {
            metadata: ObjectMeta {
                name: Some("cm".into()),
                namespace: Some(ns.into()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        tx.unbounded_send(WatchEvent::Applied(cm("kube-system"))).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scripted.calls(), 1);

        tx.unbounded_send(WatchEvent::Deleted(cm("operand-ns"))).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scripted.calls(), 2);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn resync_requeues_at_most_once_per_period() {
        pause();
        let scripted = Scripted::new([]);
        let shutdown = CancellationToken::new();
        let controller = Controller::new(scripted.clone(), config().resync_every(Duration::from_secs(30)));
        let task = tokio::spawn(controller.run(shutdown.clone()));
        sleep(Duration::from_secs(95)).await;
        // initial sync plus one per elapsed period
        assert_eq!(scripted.calls(), 4);
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn requeue_after_schedules_without_backoff() {
        pause();
        let scripted = Scripted::new([
            Ok(Action::requeue(Duration::from_secs(7))),
            Ok(Action::await_change()),
        ]);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Controller::new(scripted.clone(), config()).run(shutdown.clone()));
        sleep(Duration::from_secs(20)).await;
        assert_gaps(&scripted.gaps(), &[Duration::from_secs(7)]);
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_without_requeueing() {
        pause();
        let scripted = Scripted::new([Err(SyncFailed)]);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Controller::new(scripted.clone(), config()).run(shutdown.clone()));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(scripted.calls(), 1);
        shutdown.cancel();
        task.await.unwrap();
        advance(Duration::from_secs(30)).await;
        assert_eq!(scripted.calls(), 1);
    }
}
