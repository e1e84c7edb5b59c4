use std::{collections::BTreeSet, sync::Arc};

/// The set of namespaces a controller reacts to
///
/// Watch events about objects in any other namespace are dropped before they reach the queue.
/// Cluster-scoped objects carry no namespace and always pass.
///
/// ```
/// use operator_runtime::utils::predicate::NamespaceFilter;
/// let filter = NamespaceFilter::new(["openshift-apiserver", "openshift-config"]);
/// assert!(filter.matches(Some("openshift-config")));
/// assert!(!filter.matches(Some("kube-system")));
/// assert!(filter.matches(None));
/// assert!(NamespaceFilter::all().matches(Some("kube-system")));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceFilter {
    namespaces: Option<Arc<BTreeSet<String>>>,
}

impl NamespaceFilter {
    /// Accept only objects located in one of `namespaces`
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespaces: Some(Arc::new(namespaces.into_iter().map(Into::into).collect())),
        }
    }

    /// Accept every object
    pub fn all() -> Self {
        Self { namespaces: None }
    }

    /// Whether an object in `namespace` is of interest
    pub fn matches(&self, namespace: Option<&str>) -> bool {
        match (&self.namespaces, namespace) {
            (None, _) | (_, None) => true,
            (Some(set), Some(ns)) => set.contains(ns),
        }
    }
}

impl Default for NamespaceFilter {
    fn default() -> Self {
        Self::all()
    }
}
