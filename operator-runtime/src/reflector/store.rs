use super::{ObjectRef, WatchEvent};
use ahash::AHashMap;
use educe::Educe;
use kube_core::{Resource, ResourceExt};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

type Cache<K> = Arc<RwLock<AHashMap<ObjectRef, Arc<K>>>>;

/// A writable Store handle
///
/// This is exclusive since it's not safe to share a single `Store` between multiple reflectors.
/// In particular, `Restarted` events will clobber the state of other connected reflectors.
#[derive(Debug)]
pub struct Writer<K> {
    store: Cache<K>,
}

impl<K> Default for Writer<K> {
    fn default() -> Self {
        Self {
            store: Arc::default(),
        }
    }
}

impl<K: Resource + Clone> Writer<K> {
    /// Return a read handle to the store
    ///
    /// Multiple read handles may be obtained, by either calling `as_reader` multiple times,
    /// or by calling `Store::clone()` afterwards.
    #[must_use]
    pub fn as_reader(&self) -> Store<K> {
        Store {
            store: self.store.clone(),
        }
    }

    /// Applies a single watch event to the store
    pub fn apply_event(&mut self, event: &WatchEvent<K>) {
        match event {
            WatchEvent::Applied(obj) => {
                self.store
                    .write()
                    .insert(ObjectRef::from_obj(obj), Arc::new(obj.clone()));
            }
            WatchEvent::Deleted(obj) => {
                self.store.write().remove(&ObjectRef::from_obj(obj));
            }
            WatchEvent::Restarted(new_objs) => {
                let new_objs = new_objs
                    .iter()
                    .map(|obj| (ObjectRef::from_obj(obj), Arc::new(obj.clone())))
                    .collect::<AHashMap<_, _>>();
                *self.store.write() = new_objs;
            }
        }
    }
}

/// A readable cache of objects of kind `K`
///
/// Cloning will produce a new reference to the same backing store.
///
/// Cannot be constructed directly since one writer handle is required,
/// use [`store()`] or `Writer::as_reader()` instead.
#[derive(Educe)]
#[educe(Debug, Clone)]
pub struct Store<K> {
    store: Cache<K>,
}

impl<K: Resource + Clone> Store<K> {
    /// Retrieve the entry referred to by `key`, if it is in the cache.
    ///
    /// `key.namespace` is ignored for cluster-scoped resources.
    ///
    /// Note that this is a cache and may be stale. Deleted objects may still exist in the cache
    /// despite having been deleted in the cluster, and new objects may not yet exist in the cache.
    /// A reconciler that depends on an object being present should treat a miss as "not synced yet"
    /// and retry later rather than as a definitive absence.
    #[must_use]
    pub fn get(&self, key: &ObjectRef) -> Option<Arc<K>> {
        let store = self.store.read();
        store
            .get(key)
            // Try to erase the namespace and try again, in case the object is cluster-scoped
            .or_else(|| {
                let mut cluster_key = key.clone();
                cluster_key.namespace = None;
                store.get(&cluster_key)
            })
            .cloned()
    }

    /// Look up `name` in `namespace`
    #[must_use]
    pub fn get_namespaced(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.get(&ObjectRef::new(name).within(namespace))
    }

    /// Return a full snapshot of the current values, ordered by reference
    #[must_use]
    pub fn list(&self) -> Vec<Arc<K>> {
        self.snapshot(|_| true)
    }

    /// Return the objects located in `namespace`, ordered by name
    #[must_use]
    pub fn list_namespaced(&self, namespace: &str) -> Vec<Arc<K>> {
        self.snapshot(|obj| obj.meta().namespace.as_deref() == Some(namespace))
    }

    /// Return the objects in `namespace` carrying every label in `selector`
    ///
    /// An empty selector matches everything in the namespace.
    #[must_use]
    pub fn list_matching(&self, namespace: &str, selector: &BTreeMap<String, String>) -> Vec<Arc<K>> {
        self.snapshot(|obj| {
            let labels = obj.labels();
            obj.meta().namespace.as_deref() == Some(namespace)
                && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
        })
    }

    /// Number of cached objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    fn snapshot(&self, filter: impl Fn(&K) -> bool) -> Vec<Arc<K>> {
        let store = self.store.read();
        let mut objs: Vec<(&ObjectRef, &Arc<K>)> = store.iter().filter(|(_, obj)| filter(obj)).collect();
        objs.sort_by(|a, b| a.0.cmp(b.0));
        objs.into_iter().map(|(_, obj)| obj.clone()).collect()
    }
}

/// Create a (Reader, Writer) for a `Store<K>` for a typed resource `K`
///
/// The `Writer` should be passed to a [`reflector`](super::reflector()),
/// and the [`Store`] is a read-only handle.
#[must_use]
pub fn store<K: Resource + Clone>() -> (Store<K>, Writer<K>) {
    let w = Writer::<K>::default();
    let r = w.as_reader();
    (r, w)
}

#[cfg(test)]
mod tests {
    use super::{store, Writer};
    use crate::reflector::{ObjectRef, WatchEvent};
    use k8s_openapi::{api::core::v1::ConfigMap, apimachinery::pkg::apis::meta::v1::ObjectMeta};
    use std::collections::BTreeMap;

    fn cm(namespace: Option<&str>, name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: namespace.map(String::from),
                labels: Some(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[test]
    fn should_allow_getting_namespaced_object_by_namespaced_ref() {
        let cm = cm(Some("ns"), "obj", &[]);
        let mut store_w = Writer::default();
        store_w.apply_event(&WatchEvent::Applied(cm.clone()));
        let store = store_w.as_reader();
        assert_eq!(store.get(&ObjectRef::from_obj(&cm)).as_deref(), Some(&cm));
        assert_eq!(store.get_namespaced("ns", "obj").as_deref(), Some(&cm));
    }

    #[test]
    fn should_not_allow_getting_namespaced_object_by_clusterscoped_ref() {
        let cm = cm(Some("ns"), "obj", &[]);
        let mut store_w = Writer::default();
        store_w.apply_event(&WatchEvent::Applied(cm));
        let store = store_w.as_reader();
        assert_eq!(store.get(&ObjectRef::new("obj")), None);
    }

    #[test]
    fn should_allow_getting_clusterscoped_object_by_namespaced_ref() {
        let cm = cm(None, "obj", &[]);
        let mut store_w = Writer::default();
        store_w.apply_event(&WatchEvent::Applied(cm.clone()));
        let store = store_w.as_reader();
        assert_eq!(store.get_namespaced("ns", "obj").as_deref(), Some(&cm));
    }

    #[test]
    fn deleted_and_relisted_objects_leave_the_cache() {
        let (reader, mut writer) = store();
        let a = cm(Some("ns"), "a", &[]);
        let b = cm(Some("ns"), "b", &[]);
        writer.apply_event(&WatchEvent::Applied(a.clone()));
        writer.apply_event(&WatchEvent::Applied(b.clone()));
        writer.apply_event(&WatchEvent::Deleted(a.clone()));
        assert_eq!(reader.len(), 1);

        let c = cm(Some("ns"), "c", &[]);
        writer.apply_event(&WatchEvent::Restarted(vec![a.clone(), c.clone()]));
        let names: Vec<_> = reader.list().iter().map(|o| o.metadata.name.clone()).collect();
        assert_eq!(names, vec![Some("a".to_string()), Some("c".to_string())]);
    }

    #[test]
    fn listing_filters_by_namespace_and_labels() {
        let (reader, mut writer) = store();
        writer.apply_event(&WatchEvent::Restarted(vec![
            cm(Some("operand"), "pod-1", &[("app", "apiserver"), ("revision", "3")]),
            cm(Some("operand"), "pod-2", &[("app", "apiserver"), ("revision", "4")]),
            cm(Some("operand"), "other", &[("app", "other")]),
            cm(Some("elsewhere"), "pod-3", &[("app", "apiserver")]),
        ]));
        assert_eq!(reader.list_namespaced("operand").len(), 3);

        let selector = BTreeMap::from([("app".to_string(), "apiserver".to_string())]);
        let names: Vec<_> = reader
            .list_matching("operand", &selector)
            .iter()
            .filter_map(|o| o.metadata.name.clone())
            .collect();
        assert_eq!(names, vec!["pod-1", "pod-2"]);
        assert_eq!(reader.list_matching("operand", &BTreeMap::new()).len(), 3);
    }
}
