use kube_core::{Resource, ResourceExt};
use std::fmt::{self, Display};

/// A namespaced (if relevant) reference to an object in a [`Store`](super::Store)
///
/// The kind is not part of the reference: every store holds a single kind.
///
/// ```
/// use operator_runtime::reflector::ObjectRef;
/// assert_ne!(ObjectRef::new("foo"), ObjectRef::new("foo").within("bar"));
/// assert_eq!(ObjectRef::new("foo").within("bar").to_string(), "bar/foo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub struct ObjectRef {
    /// The name of the object
    pub name: String,
    /// The namespace of the object
    ///
    /// May only be `None` if the kind is cluster-scoped.
    pub namespace: Option<String>,
}

impl ObjectRef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Creates an `ObjectRef` pointing at `obj`
    #[must_use]
    pub fn from_obj<K: Resource>(obj: &K) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.meta().namespace.clone(),
        }
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
