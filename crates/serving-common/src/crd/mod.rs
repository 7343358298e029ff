//! Custom Resource Definitions and supporting types

mod conditions;
mod knative_serving;
mod types;

pub use conditions::{
    ConditionSet, ConditionSetView, CONDITION_DEPLOYMENTS_AVAILABLE, CONDITION_INSTALL_SUCCEEDED,
    CONDITION_READY, SERVING_CONDITIONS,
};
pub use knative_serving::{
    CustomCerts, CustomCertsKind, GatewayOverride, GatewayPort, GatewayServer, KnativeServing,
    KnativeServingSpec, KnativeServingStatus, LocalObjectReference, Registry, ResourceRequirements,
};
pub use types::{Condition, ConditionStatus, ResourceRef};
