//! Caches objects in memory
//!
//! Collaborators feed [`WatchEvent`]s through [`reflector`], which keeps a [`Store`] current and
//! passes every event on, so the same stream can trigger a [`Controller`](crate::Controller).
//! Reconcilers only ever read from the [`Store`]; reads never touch the network.

mod object_ref;
pub mod store;

pub use self::object_ref::ObjectRef;
pub use store::{store, Store, Writer};

use futures::{Stream, StreamExt};
use kube_core::Resource;

/// A change to the watched set of objects
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    /// An object was added or modified
    Applied(K),
    /// An object was deleted
    ///
    /// Only the last known state of the object is carried.
    Deleted(K),
    /// The watch was (re)started and this is the full current set
    ///
    /// Objects missing from the list no longer exist.
    Restarted(Vec<K>),
}

impl<K> WatchEvent<K> {
    /// Objects added, modified or relisted by this event
    pub fn into_iter_applied(self) -> impl Iterator<Item = K> {
        match self {
            WatchEvent::Applied(obj) => vec![obj],
            WatchEvent::Deleted(_) => vec![],
            WatchEvent::Restarted(objs) => objs,
        }
        .into_iter()
    }
}

/// Cache objects from a stream of [`WatchEvent`]s into a local [`Store`]
///
/// The events pass through unmodified, after the store has been updated.
///
/// ```
/// use futures::{stream, StreamExt};
/// use k8s_openapi::api::core::v1::ConfigMap;
/// use operator_runtime::reflector::{self, ObjectRef, WatchEvent};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let (reader, writer) = reflector::store::<ConfigMap>();
/// let mut cm = ConfigMap::default();
/// cm.metadata.name = Some("config".into());
/// let events = reflector::reflector(writer, stream::iter([WatchEvent::Applied(cm)]));
/// assert_eq!(events.count().await, 1);
/// assert!(reader.get(&ObjectRef::new("config")).is_some());
/// # });
/// ```
pub fn reflector<K, W>(mut writer: Writer<K>, stream: W) -> impl Stream<Item = WatchEvent<K>>
where
    K: Resource + Clone,
    W: Stream<Item = WatchEvent<K>>,
{
    stream.map(move |event| {
        writer.apply_event(&event);
        event
    })
}
