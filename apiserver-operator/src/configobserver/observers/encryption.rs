use crate::{
    configobserver::{ConfigFragment, Observer, ObserverContext},
    encryption::{Convergence, UnionDeployer},
};
use operator_core::DesiredStateDocument;

/// Operand argument pointing at the encryption configuration file
pub const ENCRYPTION_PROVIDER_CONFIG: &[&str] = &["apiServerArguments", "encryption-provider-config"];

/// Turns the operand's encryption configuration on or off, once all replicas agree
///
/// While the replicas have not converged the previous setting is kept, so a rollout in progress
/// never flips the flag back and forth.
#[derive(Debug)]
pub struct EncryptionObserver {
    deployer: UnionDeployer,
}

impl EncryptionObserver {
    /// An observer following `deployer`'s verdict
    pub fn new(deployer: UnionDeployer) -> Self {
        Self { deployer }
    }
}

impl Observer for EncryptionObserver {
    fn name(&self) -> &'static str {
        "encryption"
    }

    fn owned_paths(&self) -> &'static [&'static [&'static str]] {
        &[ENCRYPTION_PROVIDER_CONFIG]
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment {
        match self.deployer.evaluate() {
            Ok(Convergence::Converged(Some(secret))) => {
                tracing::debug!(secret = ?secret.metadata.name, "encryption configuration converged");
                let mut observed = DesiredStateDocument::new();
                observed.set_nested_string_slice(ENCRYPTION_PROVIDER_CONFIG, &[ctx
                    .config
                    .encryption
                    .provider_config_path
                    .clone()]);
                ctx.report_change("EncryptionConfigChanged", existing, &observed, ENCRYPTION_PROVIDER_CONFIG);
                ConfigFragment::observed(observed)
            }
            Ok(Convergence::Converged(None)) => {
                let observed = DesiredStateDocument::new();
                ctx.report_change("EncryptionConfigChanged", existing, &observed, ENCRYPTION_PROVIDER_CONFIG);
                ConfigFragment::observed(observed)
            }
            Ok(Convergence::NotConverged) => {
                tracing::debug!("encryption configuration not converged, keeping previous setting");
                ConfigFragment::fallback(existing, self.owned_paths(), Vec::new())
            }
            Err(err) => ConfigFragment::fallback(existing, self.owned_paths(), vec![err]),
        }
    }
}
