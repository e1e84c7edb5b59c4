use super::data_value;
use crate::configobserver::{ConfigFragment, Observer, ObserverContext};
use operator_core::DesiredStateDocument;

/// Hostname of the cluster-internal image registry
pub const INTERNAL_REGISTRY_HOSTNAME: &[&str] = &["imagePolicyConfig", "internalRegistryHostname"];
/// Hostnames the registry is reachable under from outside the cluster
pub const EXTERNAL_REGISTRY_HOSTNAMES: &[&str] = &["imagePolicyConfig", "externalRegistryHostnames"];

/// Observes the image registry hostnames
#[derive(Debug)]
pub struct ImagesObserver;

impl Observer for ImagesObserver {
    fn name(&self) -> &'static str {
        "images"
    }

    fn owned_paths(&self) -> &'static [&'static [&'static str]] {
        &[INTERNAL_REGISTRY_HOSTNAME, EXTERNAL_REGISTRY_HOSTNAMES]
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment {
        let namespace = &ctx.config.config_namespace;
        let name = &ctx.config.objects.image_config;
        let Some(cm) = ctx.config_map(namespace, name) else {
            tracing::debug!(%namespace, %name, "image config not found, keeping previous registry hostnames");
            return ConfigFragment::fallback(existing, self.owned_paths(), Vec::new());
        };

        let mut observed = DesiredStateDocument::new();
        if let Some(internal) = data_value(&cm, "internalRegistryHostname") {
            observed.set_nested_value(INTERNAL_REGISTRY_HOSTNAME, internal);
        }
        let external: Vec<String> = data_value(&cm, "externalRegistryHostnames")
            .map(|raw| {
                raw.split([',', '\n'])
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if !external.is_empty() {
            observed.set_nested_string_slice(EXTERNAL_REGISTRY_HOSTNAMES, &external);
        }

        ctx.report_change(
            "ObserveInternalRegistryHostnameChanged",
            existing,
            &observed,
            INTERNAL_REGISTRY_HOSTNAME,
        );
        ctx.report_change(
            "ObserveExternalRegistryHostnameChanged",
            existing,
            &observed,
            EXTERNAL_REGISTRY_HOSTNAMES,
        );
        ConfigFragment::observed(observed)
    }
}
