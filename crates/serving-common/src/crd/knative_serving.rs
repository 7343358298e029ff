//! KnativeServing CRD: one installation of Knative Serving
//!
//! The spec holds the user's overrides; the controller renders the release
//! manifest through them and records progress in the status.
//!
//! Example:
//! ```yaml
//! apiVersion: operator.knative.dev/v1alpha1
//! kind: KnativeServing
//! metadata:
//!   name: knative-serving
//!   namespace: knative-serving
//! spec:
//!   config:
//!     network:
//!       ingress.class: kourier.ingress.networking.knative.dev
//!   registry:
//!     default: registry.example.com/knative/${NAME}:v0.13.0
//!     imagePullSecrets:
//!       - name: regcred
//!   controllerCustomCerts:
//!     type: Secret
//!     name: corporate-ca
//! ```

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{
    CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_INSTALL_SUCCEEDED, SERVING_CONDITIONS,
};
use super::types::{Condition, ConditionStatus, ResourceRef};

/// Desired configuration of a Knative Serving installation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.knative.dev",
    version = "v1alpha1",
    kind = "KnativeServing",
    namespaced,
    status = "KnativeServingStatus",
    shortname = "ks",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServingSpec {
    /// ConfigMap overrides keyed by the suffix after `config-`
    /// (e.g. `network` targets `config-network`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, BTreeMap<String, String>>,

    /// Image overrides
    #[serde(default)]
    pub registry: Registry,

    /// Overrides for the `knative-ingress-gateway` Gateway
    #[serde(
        default,
        alias = "knative-ingress-gateway",
        skip_serializing_if = "Option::is_none"
    )]
    pub knative_ingress_gateway: Option<GatewayOverride>,

    /// Overrides for the `cluster-local-gateway` Gateway
    #[serde(
        default,
        alias = "cluster-local-gateway",
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_local_gateway: Option<GatewayOverride>,

    /// Extra trust roots mounted into the controller Deployment
    #[serde(
        default,
        alias = "controller-custom-certs",
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_custom_certs: Option<CustomCerts>,

    /// Compute resources per container name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, ResourceRequirements>,

    /// Namespace the operand is installed into, defaults to the instance's
    #[serde(default, rename = "namespace", skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

/// Image registry overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    /// Image template applied to every container, `${NAME}` is replaced
    /// with the container name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default: String,

    /// Per-container image overrides, keyed by container name
    #[serde(default, rename = "override", skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,

    /// Pull secrets appended to every pod spec
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Name of a Secret in the instance's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Secret name
    pub name: String,
}

/// Overrides for one Istio Gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOverride {
    /// Pod selector for the gateway workload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Server list replacing the manifest's
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<GatewayServer>,
}

/// A Gateway server entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayServer {
    /// Hosts exposed by this server
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Port the server listens on
    pub port: GatewayPort,
}

/// Port of a Gateway server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayPort {
    /// Port number
    pub number: u32,
    /// Port name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Protocol, e.g. HTTP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

/// Source of custom certificates for the controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CustomCerts {
    /// `ConfigMap` or `Secret`
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Name of the ConfigMap or Secret
    #[serde(default)]
    pub name: String,
}

/// Recognised custom cert sources
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CustomCertsKind {
    /// Certificates stored in a ConfigMap
    ConfigMap,
    /// Certificates stored in a Secret
    Secret,
}

impl CustomCerts {
    /// Parse the source kind, `None` when unrecognised
    pub fn parsed_kind(&self) -> Option<CustomCertsKind> {
        match self.kind.as_str() {
            "ConfigMap" => Some(CustomCertsKind::ConfigMap),
            "Secret" => Some(CustomCertsKind::Secret),
            _ => None,
        }
    }
}

/// Container compute resources, quantities kept as strings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    /// Resource limits, e.g. `cpu: 1`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    /// Resource requests, e.g. `memory: 100Mi`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

/// Observed state of a KnativeServing instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServingStatus {
    /// Release version of the last successful install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Resources applied by the last install attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceRef>,

    /// Ready, InstallSucceeded, DeploymentsAvailable
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl KnativeServingStatus {
    /// Set every missing condition to Unknown
    pub fn initialize_conditions(&mut self) {
        SERVING_CONDITIONS.manage(&mut self.conditions).initialize();
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Ready is True
    pub fn is_ready(&self) -> bool {
        self.condition_is(SERVING_CONDITIONS.happy(), ConditionStatus::True)
    }

    /// InstallSucceeded is True
    pub fn is_installed(&self) -> bool {
        self.condition_is(CONDITION_INSTALL_SUCCEEDED, ConditionStatus::True)
    }

    /// DeploymentsAvailable is True
    pub fn is_available(&self) -> bool {
        self.condition_is(CONDITION_DEPLOYMENTS_AVAILABLE, ConditionStatus::True)
    }

    /// Installed, but deployments have not come up yet
    pub fn is_deploying(&self) -> bool {
        self.is_installed() && !self.is_available()
    }

    /// Mark InstallSucceeded True
    pub fn mark_install_succeeded(&mut self) {
        SERVING_CONDITIONS
            .manage(&mut self.conditions)
            .mark_true(CONDITION_INSTALL_SUCCEEDED);
    }

    /// Mark InstallSucceeded False with the failure message
    pub fn mark_install_failed(&mut self, message: &str) {
        SERVING_CONDITIONS.manage(&mut self.conditions).mark_false(
            CONDITION_INSTALL_SUCCEEDED,
            "Error",
            &format!("Install failed with message: {message}"),
        );
    }

    /// Mark DeploymentsAvailable True
    pub fn mark_deployments_available(&mut self) {
        SERVING_CONDITIONS
            .manage(&mut self.conditions)
            .mark_true(CONDITION_DEPLOYMENTS_AVAILABLE);
    }

    /// Mark DeploymentsAvailable False while workloads come up
    pub fn mark_deployments_not_ready(&mut self) {
        SERVING_CONDITIONS.manage(&mut self.conditions).mark_false(
            CONDITION_DEPLOYMENTS_AVAILABLE,
            "NotReady",
            "Waiting on deployments",
        );
    }

    /// Mark DeploymentsAvailable False because a deployment could not be read
    pub fn mark_deployments_check_failed(&mut self, message: &str) {
        SERVING_CONDITIONS.manage(&mut self.conditions).mark_false(
            CONDITION_DEPLOYMENTS_AVAILABLE,
            "NotReady",
            message,
        );
    }

    fn condition_is(&self, type_: &str, status: ConditionStatus) -> bool {
        self.condition(type_).is_some_and(|c| c.status == status)
    }
}

impl KnativeServing {
    /// Namespace the operand is installed into
    pub fn target_namespace(&self) -> String {
        self.spec
            .target_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.namespace())
            .unwrap_or_else(|| crate::DEFAULT_OPERAND_NAMESPACE.to_string())
    }

    /// Whether operand objects live in the instance's own namespace
    ///
    /// Owner references cannot cross namespaces; the garbage collector
    /// deletes dependents whose owner it cannot find in their namespace.
    pub fn can_own_operand(&self) -> bool {
        self.namespace().as_deref() == Some(self.target_namespace().as_str())
    }

    /// `namespace/name` key used for logging and generation tracking
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Gateway override for a known gateway name
    pub fn gateway_override(&self, gateway: &str) -> Option<&GatewayOverride> {
        match gateway {
            "knative-ingress-gateway" => self.spec.knative_ingress_gateway.as_ref(),
            "cluster-local-gateway" => self.spec.cluster_local_gateway.as_ref(),
            _ => None,
        }
    }

    /// Status, created empty when absent
    pub fn status_mut(&mut self) -> &mut KnativeServingStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
