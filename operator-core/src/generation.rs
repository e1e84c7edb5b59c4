//! Generations of controlled objects, recorded at their last successful apply
//!
//! An object's `metadata.generation` is bumped by the apiserver on every spec change. Recording
//! the generation we produced lets the next cycle notice that somebody else changed the object,
//! and lets status derivation tell whether the controlled object caught up with our last write.
use serde::{Deserialize, Serialize};

/// The last generation of one controlled object, as written by the operator
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    /// API group of the object
    pub group: String,
    /// Plural resource name of the object
    pub resource: String,
    /// Namespace of the object
    pub namespace: String,
    /// Name of the object
    pub name: String,
    /// The generation returned by the last successful apply
    pub last_generation: i64,
    /// Optional content hash of the last apply
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hash: String,
}

impl GenerationStatus {
    fn same_object(&self, other: &GenerationStatus) -> bool {
        self.group == other.group
            && self.resource == other.resource
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

/// Returns the recorded generation for the object identified by `group/resource namespace/name`
pub fn expected_generation(
    generations: &[GenerationStatus],
    group: &str,
    resource: &str,
    namespace: &str,
    name: &str,
) -> Option<i64> {
    generations
        .iter()
        .find(|g| g.group == group && g.resource == resource && g.namespace == namespace && g.name == name)
        .map(|g| g.last_generation)
}

/// Records `new`, replacing any record for the same object
pub fn set_generation(generations: &mut Vec<GenerationStatus>, new: GenerationStatus) {
    match generations.iter_mut().find(|g| g.same_object(&new)) {
        Some(existing) => *existing = new,
        None => generations.push(new),
    }
}

/// Whether an object with `generation` / `observed_generation` has caught up with the recorded apply
///
/// Holds when the object's controller observed its latest generation, and that generation is the
/// one recorded (or nothing was recorded yet).
pub fn generation_observed(recorded: Option<i64>, generation: i64, observed_generation: i64) -> bool {
    observed_generation == generation && recorded.is_none_or(|r| r == generation)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, generation: i64) -> GenerationStatus {
        GenerationStatus {
            group: "apps".into(),
            resource: "deployments".into(),
            namespace: "ns".into(),
            name: name.into(),
            last_generation: generation,
            hash: String::new(),
        }
    }

    #[test]
    fn set_generation_replaces_same_object() {
        let mut gens = vec![];
        set_generation(&mut gens, record("apiserver", 1));
        set_generation(&mut gens, record("other", 7));
        set_generation(&mut gens, record("apiserver", 2));
        assert_eq!(gens.len(), 2);
        assert_eq!(expected_generation(&gens, "apps", "deployments", "ns", "apiserver"), Some(2));
        assert_eq!(expected_generation(&gens, "apps", "deployments", "ns", "missing"), None);
    }

    #[test]
    fn observed_requires_both_generation_matches() {
        assert!(generation_observed(Some(3), 3, 3));
        assert!(generation_observed(None, 3, 3));
        assert!(!generation_observed(Some(3), 4, 4));
        assert!(!generation_observed(Some(101), 101, 100));
    }
}
