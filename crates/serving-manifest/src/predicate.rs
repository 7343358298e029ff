//! Resource predicates used to filter and order manifests

use crate::resource::Resource;

/// Role or ClusterRole
pub fn is_role(resource: &Resource) -> bool {
    matches!(resource.kind(), "Role" | "ClusterRole") && is_rbac_group(resource)
}

/// RoleBinding or ClusterRoleBinding
pub fn is_role_binding(resource: &Resource) -> bool {
    matches!(resource.kind(), "RoleBinding" | "ClusterRoleBinding") && is_rbac_group(resource)
}

/// Any RBAC resource
pub fn is_rbac(resource: &Resource) -> bool {
    is_role(resource) || is_role_binding(resource)
}

/// CustomResourceDefinition
pub fn is_crd(resource: &Resource) -> bool {
    resource.kind() == "CustomResourceDefinition"
}

/// Everything except CRDs
pub fn no_crds(resource: &Resource) -> bool {
    !is_crd(resource)
}

/// Match a single kind
pub fn by_kind(kind: &str) -> impl Fn(&Resource) -> bool + '_ {
    move |resource| resource.kind() == kind
}

/// Match a resource by kind and name
pub fn by_name<'a>(kind: &'a str, name: &'a str) -> impl Fn(&Resource) -> bool + 'a {
    move |resource| resource.kind() == kind && resource.name() == name
}

/// Match when any predicate matches
pub fn any_of<'a>(
    predicates: &'a [&'a (dyn Fn(&Resource) -> bool + Sync)],
) -> impl Fn(&Resource) -> bool + 'a {
    move |resource| predicates.iter().any(|p| p(resource))
}

/// Match when no predicate matches
pub fn none_of<'a>(
    predicates: &'a [&'a (dyn Fn(&Resource) -> bool + Sync)],
) -> impl Fn(&Resource) -> bool + 'a {
    move |resource| !predicates.iter().any(|p| p(resource))
}

fn is_rbac_group(resource: &Resource) -> bool {
    resource.group() == "rbac.authorization.k8s.io"
}
