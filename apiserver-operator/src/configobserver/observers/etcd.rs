use crate::{
    configobserver::{ConfigFragment, Observer, ObserverContext},
    Error,
};
use operator_core::DesiredStateDocument;
use std::net::IpAddr;

/// Where the etcd client urls go
pub const STORAGE_URLS: &[&str] = &["storageConfig", "urls"];

/// Annotation carrying the address of the temporary bootstrap member
const BOOTSTRAP_ANNOTATION: &str = "alpha.installer.openshift.io/etcd-bootstrap";

/// Observes the etcd members the operand talks to
///
/// The endpoints config map maps member ids to addresses. Addresses in `192.0.2.0/24` are
/// placeholders for members that are not really there yet and are skipped.
#[derive(Debug)]
pub struct EtcdObserver;

fn is_placeholder(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.octets()[..3] == [192, 0, 2])
}

fn etcd_url(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("https://{v4}:2379"),
        IpAddr::V6(v6) => format!("https://[{v6}]:2379"),
    }
}

impl Observer for EtcdObserver {
    fn name(&self) -> &'static str {
        "etcd"
    }

    fn owned_paths(&self) -> &'static [&'static [&'static str]] {
        &[STORAGE_URLS]
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment {
        let namespace = &ctx.config.objects.etcd_namespace;
        let name = &ctx.config.objects.etcd_endpoints;
        let Some(cm) = ctx.config_map(namespace, name) else {
            tracing::warn!(%namespace, %name, "etcd endpoints not found, keeping previous storage urls");
            return ConfigFragment::fallback(existing, self.owned_paths(), Vec::new());
        };

        let bootstrap = cm
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(BOOTSTRAP_ANNOTATION))
            .map(|addr| (BOOTSTRAP_ANNOTATION, addr));
        let members = cm.data.iter().flatten().map(|(id, addr)| (id.as_str(), addr));

        let mut urls = Vec::new();
        let mut errors = Vec::new();
        for (member, addr) in members.chain(bootstrap) {
            match addr.trim().parse::<IpAddr>() {
                Ok(ip) if is_placeholder(&ip) => {
                    tracing::debug!(member, %ip, "skipping placeholder etcd address");
                }
                Ok(ip) => urls.push(etcd_url(&ip)),
                Err(err) => errors.push(Error::Core(operator_core::Error::InvalidObject(format!(
                    "configmaps/{name}: member {member} has invalid address {addr:?}: {err}"
                )))),
            }
        }
        if !errors.is_empty() {
            return ConfigFragment::fallback(existing, self.owned_paths(), errors);
        }
        if urls.is_empty() {
            let err = operator_core::Error::InvalidObject(format!(
                "configmaps/{name}: no etcd endpoint addresses found"
            ));
            ctx.recorder.warning("ObserveStorageFailed", err.to_string());
            return ConfigFragment::fallback(existing, self.owned_paths(), vec![err.into()]);
        }
        urls.sort();
        urls.dedup();

        let mut observed = DesiredStateDocument::new();
        observed.set_nested_string_slice(STORAGE_URLS, &urls);
        ctx.report_change("ObserveStorageUpdated", existing, &observed, STORAGE_URLS);
        ConfigFragment::observed(observed)
    }
}
