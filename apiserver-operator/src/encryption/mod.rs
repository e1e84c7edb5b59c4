//! Deciding which encryption configuration is deployed
//!
//! Each replica of the operand runs some revision of the encryption configuration. Before anything
//! builds on top of it (the observed config, key migration), every replica has to agree on the same
//! configuration. [`UnionDeployer`] reduces the reports of independent sources to one verdict:
//! converged with a configuration, converged without one (encryption off), or not converged yet.
//! Not converged is a normal transient state, never an error.

mod config;
mod deployer;

#[cfg(test)]
pub(crate) use config::encryption_secret;
#[cfg(test)]
pub(crate) use deployer::StaticDeployer;
pub use config::{
    decode, EncryptionConfiguration, IdentityConfiguration, Key, KeysConfiguration, ProviderConfiguration,
    ResourceConfiguration, ENCRYPTION_CONFIG_KEY,
};
pub use deployer::{
    Convergence, ConvergenceReport, Deployer, RevisionLabelPodDeployer, UnionDeployer,
};
