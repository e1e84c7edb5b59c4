use super::data_value;
use crate::configobserver::{ConfigFragment, Observer, ObserverContext};
use operator_core::DesiredStateDocument;

/// Message shown when project self-provisioning is refused
pub const PROJECT_REQUEST_MESSAGE: &[&str] = &["projectConfig", "projectRequestMessage"];
/// `<namespace>/<name>` of the template new projects are created from
pub const PROJECT_REQUEST_TEMPLATE: &[&str] = &["projectConfig", "projectRequestTemplate"];

/// Observes the project request settings
#[derive(Debug)]
pub struct ProjectObserver;

impl Observer for ProjectObserver {
    fn name(&self) -> &'static str {
        "project"
    }

    fn owned_paths(&self) -> &'static [&'static [&'static str]] {
        &[PROJECT_REQUEST_MESSAGE, PROJECT_REQUEST_TEMPLATE]
    }

    fn observe(&self, ctx: &ObserverContext<'_>, existing: &DesiredStateDocument) -> ConfigFragment {
        let namespace = &ctx.config.config_namespace;
        let name = &ctx.config.objects.project_config;
        let Some(cm) = ctx.config_map(namespace, name) else {
            tracing::debug!(%namespace, %name, "project config not found, keeping previous project settings");
            return ConfigFragment::fallback(existing, self.owned_paths(), Vec::new());
        };

        let mut observed = DesiredStateDocument::new();
        if let Some(message) = data_value(&cm, "projectRequestMessage") {
            observed.set_nested_value(PROJECT_REQUEST_MESSAGE, message);
        }
        if let Some(template) = data_value(&cm, "projectRequestTemplate") {
            // templates always live in the config namespace
            observed.set_nested_value(PROJECT_REQUEST_TEMPLATE, format!("{namespace}/{template}"));
        }
        ctx.report_change("ObserveProjectRequestMessageChanged", existing, &observed, PROJECT_REQUEST_MESSAGE);
        ctx.report_change("ObserveProjectRequestTemplateChanged", existing, &observed, PROJECT_REQUEST_TEMPLATE);
        ConfigFragment::observed(observed)
    }
}
