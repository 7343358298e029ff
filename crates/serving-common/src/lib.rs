//! Common types for the serving operator: the KnativeServing CRD, conditions,
//! errors, and utilities shared by the manifest engine and the controller

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the KnativeServing resource
pub const OPERATOR_GROUP: &str = "operator.knative.dev";

/// Namespace the default KnativeServing instance lives in
pub const DEFAULT_OPERAND_NAMESPACE: &str = "knative-serving";

/// Name of the default KnativeServing instance
pub const DEFAULT_OPERAND_NAME: &str = "knative-serving";

/// Finalizer the controller owns on every KnativeServing instance
pub const SERVING_FINALIZER: &str = "delete-knative-serving-manifest";

/// Field manager used for all writes made by the operator
pub const FIELD_MANAGER: &str = "serving-operator";

/// Annotation stamped on every object the operator creates
pub const CREATED_BY_ANNOTATION: &str = "manifestival";

/// Value of [`CREATED_BY_ANNOTATION`] on operator-created objects
pub const CREATED_BY_VALUE: &str = "new";
