use super::data_value;
use crate::configobserver::{ConfigFragment, Observer, ObserverContext};
use operator_core::DesiredStateDocument;

/// Default subdomain of routes
pub const ROUTING_SUBDOMAIN: &[&str] = &["routingConfig", "subdomain"];

/// Observes the cluster ingress domain
#[derive(Debug)]
pub struct IngressObserver;

impl Observer for IngressObserver {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn owned_paths(&self) -> &'static [&'static [&'static str]] {
        &[ROUTING_SUBDOMAIN]
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment {
        let namespace = &ctx.config.config_namespace;
        let name = &ctx.config.objects.ingress_config;
        let Some(cm) = ctx.config_map(namespace, name) else {
            tracing::debug!(%namespace, %name, "ingress config not found, keeping previous subdomain");
            return ConfigFragment::fallback(existing, self.owned_paths(), Vec::new());
        };
        let Some(domain) = data_value(&cm, "domain") else {
            let err = operator_core::Error::InvalidObject(format!("configmaps/{name}: ingress domain is empty"));
            ctx.recorder.warning("ObserveRoutingConfigFailed", err.to_string());
            return ConfigFragment::fallback(existing, self.owned_paths(), vec![err.into()]);
        };

        let mut observed = DesiredStateDocument::new();
        observed.set_nested_value(ROUTING_SUBDOMAIN, domain);
        ctx.report_change("RoutingConfigSubdomainChanged", existing, &observed, ROUTING_SUBDOMAIN);
        ConfigFragment::observed(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::{IngressObserver, ROUTING_SUBDOMAIN};
    use crate::{configobserver::Observer, fakes::FakeCluster};
    use operator_core::DesiredStateDocument;
    use serde_json::json;

    #[test]
    fn empty_domain_keeps_previous_subdomain() {
        let cluster = FakeCluster::new();
        let existing = DesiredStateDocument::from_value(json!({"routingConfig": {"subdomain": "apps.a.com"}})).unwrap();
        cluster.put_config_map("openshift-config", "ingress-config", &[("domain", " ")]);
        let fragment = IngressObserver.observe(&cluster.ctx(), &existing);
        assert_eq!(fragment.errors.len(), 1);
        assert_eq!(fragment.config.nested_string(ROUTING_SUBDOMAIN), Some("apps.a.com"));

        cluster.put_config_map("openshift-config", "ingress-config", &[("domain", "apps.b.com")]);
        let fragment = IngressObserver.observe(&cluster.ctx(), &existing);
        assert!(fragment.errors.is_empty());
        assert_eq!(fragment.config.nested_string(ROUTING_SUBDOMAIN), Some("apps.b.com"));
        assert_eq!(cluster.recorder.reasons(), vec![
            "ObserveRoutingConfigFailed",
            "RoutingConfigSubdomainChanged"
        ]);
    }
}
