//! Keeps an aggregated API server deployed and configured the way the cluster says it should be.
//!
//! # Overview
//!
//! The operator is made of two controllers built on [`operator_runtime::Controller`]:
//!
//! - [`configobserver::ConfigObserver`] watches cluster-wide facts (etcd members, registry
//!   hostnames, ingress domain, project settings, the deployed encryption configuration) and folds
//!   them into the desired-state document stored on the [`resources::ApiServerOperator`] resource.
//! - [`workload::WorkloadSynchronizer`] renders that document into the operand's configuration,
//!   rolls out the deployment and reports `Available` / `Progressing` / `Degraded` conditions.
//!
//! Neither talks to a cluster directly. Reads go through cached [`client::Listers`] and writes
//! through the traits of [`client`], so the same code runs against a real cluster or the in-memory
//! fakes of the tests.
//!
//! # Running the operator
//!
//! ```no_run
//! use apiserver_operator::{
//!     config::OperatorConfig,
//!     operator::{Collaborators, Operator},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(collaborators: Collaborators, shutdown: CancellationToken) -> apiserver_operator::Result<()> {
//!     let config = OperatorConfig::from_yaml("targetNamespace: openshift-apiserver\nreplicas: 3\n")?;
//!     Operator::new(config, collaborators)?.run(shutdown).await;
//!     Ok(())
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod apiservice;
pub mod client;
pub mod config;
pub mod configobserver;
pub mod encryption;
pub mod operator;
pub mod resources;
pub mod status;
pub mod workload;

mod error;
pub use error::{Error, Result};

#[cfg(test)]
mod fakes;
