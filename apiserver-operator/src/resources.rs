//! The custom resource the operator reconciles
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, ClusterResourceScope};
use operator_core::{OperatorSpec, OperatorStatus};
use serde::{Deserialize, Serialize};

/// Desired and observed state of the managed API server, `operator.openshift.io/v1 OpenShiftAPIServer`
///
/// The spec carries the desired-state document (`spec.observedConfig`) written by the config
/// observer; the status carries the conditions written by every controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerOperator {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Desired state
    #[serde(default)]
    pub spec: OperatorSpec,
    /// Observed state, absent until first written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OperatorStatus>,
}

impl ApiServerOperator {
    /// A resource called `name` with an empty spec
    pub fn new(name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Self::default()
        }
    }

    /// `metadata.generation`, zero when unset
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }
}

impl k8s_openapi::Resource for ApiServerOperator {
    type Scope = ClusterResourceScope;

    const API_VERSION: &'static str = "operator.openshift.io/v1";
    const GROUP: &'static str = "operator.openshift.io";
    const KIND: &'static str = "OpenShiftAPIServer";
    const URL_PATH_SEGMENT: &'static str = "openshiftapiservers";
    const VERSION: &'static str = "v1";
}

impl k8s_openapi::Metadata for ApiServerOperator {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}
