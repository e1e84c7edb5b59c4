//! The desired-state document driving the operand's runtime configuration
//!
//! A [`DesiredStateDocument`] is a tree of string keyed json objects with scalar or array
//! leaves. Config observers each produce a fragment of it; fragments are deep merged into the
//! document that gets persisted on the operator resource.
//!
//! Merging does not resolve conflicts: when two fragments write the same leaf path, the one
//! merged last wins. Observers are expected to own disjoint key paths.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A nested key-value tree of configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredStateDocument(Map<String, Value>);

impl DesiredStateDocument {
    /// An empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from a json value
    ///
    /// `null` becomes an empty document. Anything other than an object or `null` is rejected.
    pub fn from_value(value: Value) -> Result<Self, crate::Error> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Ok(Self(map)),
            other => Err(crate::Error::InvalidObject(format!(
                "desired state must be an object, got {other}"
            ))),
        }
    }

    /// Parses a document from raw json bytes; empty input is an empty document
    pub fn from_slice(raw: &[u8]) -> Result<Self, crate::Error> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }
        Self::from_value(serde_json::from_slice(raw)?)
    }

    /// The document as a json value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Consumes the document into a json value
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Whether the document has no keys at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top level map
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the value at `path`, if every intermediate node is an object
    pub fn nested_value(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut node = &self.0;
        for key in parents {
            node = node.get(*key)?.as_object()?;
        }
        node.get(*last)
    }

    /// Returns the string at `path`
    pub fn nested_string(&self, path: &[&str]) -> Option<&str> {
        self.nested_value(path)?.as_str()
    }

    /// Returns the string array at `path`
    ///
    /// Returns `Ok(None)` when nothing is stored there, and an error if the value is not an
    /// array of strings.
    pub fn nested_string_slice(&self, path: &[&str]) -> Result<Option<Vec<String>>, crate::Error> {
        let Some(value) = self.nested_value(path) else {
            return Ok(None);
        };
        let invalid = || crate::Error::InvalidObject(format!("{} is not a string array", path.join(".")));
        value
            .as_array()
            .ok_or_else(invalid)?
            .iter()
            .map(|v| v.as_str().map(str::to_owned).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Stores `value` at `path`, creating intermediate objects and replacing non-object nodes
    pub fn set_nested_value(&mut self, path: &[&str], value: impl Into<Value>) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };
        let mut node = &mut self.0;
        for key in parents {
            let entry = node.entry(*key).or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            node = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        node.insert((*last).to_owned(), value.into());
    }

    /// Stores a string array at `path`
    pub fn set_nested_string_slice(&mut self, path: &[&str], values: &[String]) {
        self.set_nested_value(path, values.iter().cloned().map(Value::String).collect::<Vec<_>>());
    }

    /// Removes the value at `path`, returning it
    pub fn remove_nested(&mut self, path: &[&str]) -> Option<Value> {
        let (last, parents) = path.split_last()?;
        let mut node = &mut self.0;
        for key in parents {
            node = node.get_mut(*key)?.as_object_mut()?;
        }
        node.remove(*last)
    }

    /// Copies the value at `path` (if any) from `self` into a fresh document
    ///
    /// This is how an observer falls back to the previously observed value for the paths it owns.
    pub fn extract(&self, paths: &[&[&str]]) -> Self {
        let mut out = Self::new();
        for path in paths {
            if let Some(value) = self.nested_value(path) {
                out.set_nested_value(path, value.clone());
            }
        }
        out
    }

    /// Deep merges `other` into `self`
    ///
    /// Objects are merged key by key; any other value in `other` replaces the value in `self`.
    pub fn merge(&mut self, other: &DesiredStateDocument) {
        merge_maps(&mut self.0, &other.0);
    }

    /// The sorted list of leaf paths whose values differ between `self` and `other`
    pub fn diff(&self, other: &DesiredStateDocument) -> Vec<String> {
        let mut changed = BTreeSet::new();
        diff_maps(&self.0, &other.0, "", &mut changed);
        changed.into_iter().collect()
    }
}

impl From<Map<String, Value>> for DesiredStateDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn merge_maps(into: &mut Map<String, Value>, from: &Map<String, Value>) {
    for (key, value) in from {
        match (into.get_mut(key), value) {
            (Some(Value::Object(dst)), Value::Object(src)) => merge_maps(dst, src),
            _ => {
                into.insert(key.clone(), value.clone());
            }
        }
    }
}

fn diff_maps(a: &Map<String, Value>, b: &Map<String, Value>, prefix: &str, out: &mut BTreeSet<String>) {
    let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match (a.get(key), b.get(key)) {
            (Some(Value::Object(x)), Some(Value::Object(y))) => diff_maps(x, y, &path, out),
            (x, y) if x == y => {}
            _ => {
                out.insert(path);
            }
        }
    }
}
