//! Types and client-less behavior shared by the operator crates
//!
//! Nothing in here talks to a cluster. The crate holds the data model the reconcilers
//! exchange: status conditions, the operator spec/status pair, the desired-state document
//! built by config observers, dependency digests and the rollout generation record.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod conditions;
pub use conditions::{ConditionStatus, OperatorCondition};

pub mod document;
pub use document::DesiredStateDocument;

pub mod generation;
pub use generation::GenerationStatus;

pub mod hash;
pub use hash::DependencyHash;

pub mod operator;
pub use operator::{LogLevel, ManagementState, OperatorSpec, OperatorStatus};

mod error;
pub use error::{Aggregate, Error, ErrorResponse};

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
