//! Common components for building reconcile loops
//!
//! This crate contains the machinery every controller of the operator is built from:
//! a deduplicating, rate-limited [`queue`], the single-worker [`controller`] loop that drains it,
//! read-only object caches ([`reflector`]) and fire-and-forget audit [`events`].
//! Nothing in here knows what is being reconciled.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]

pub mod controller;
pub mod events;
pub mod queue;
pub mod reflector;
pub mod utils;

pub use controller::{Action, Controller, Reconciler};
pub use events::{Recorder, TracingRecorder};
pub use queue::{event_queue, EventQueue, QueueHandle};
pub use reflector::{reflector, Store, WatchEvent};
pub use utils::predicate::NamespaceFilter;
