//! Helpers shared by the runtime components

pub mod backoff;
pub mod predicate;

pub use backoff::{ResettableBackoff, ResettableBackoffWrapper};
pub use predicate::NamespaceFilter;
