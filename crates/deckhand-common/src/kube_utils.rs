//! Resource metadata and API resource helpers shared by every crate
//!
//! Typed resources are built from [`ObjectMeta`] and serialized to JSON;
//! the control plane client only ever sees `serde_json::Value`, so the
//! helpers here translate between a manifest's `apiVersion`/`kind` and the
//! kube-rs `ApiResource` needed to address it.

use std::collections::BTreeMap;

use kube::discovery::ApiResource;
use serde_json::Value;

use crate::Error;

// =============================================================================
// ObjectMeta - metadata for every synthesized resource
// =============================================================================

/// Kubernetes ObjectMeta for synthesized resources.
///
/// Automatically adds the `app=<name>` and `deployed-by=deckhand` labels on
/// construction so everything we declare can be found again for deletion.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Create metadata labelled for application `name`
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let labels = standard_labels(&name);
        Self {
            name,
            namespace: namespace.into(),
            labels,
            annotations: BTreeMap::new(),
        }
    }

    /// Create metadata for a companion object (`<app>-data`, `<app>-authz`, ...)
    ///
    /// The `app` label points at the owning application, not the object name.
    pub fn for_app(
        name: impl Into<String>,
        namespace: impl Into<String>,
        app: &str,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: standard_labels(app),
            annotations: BTreeMap::new(),
        }
    }
}

/// The `app` and `deployed-by` labels for an application
pub fn standard_labels(app: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(crate::LABEL_APP.to_string(), app.to_string());
    labels.insert(
        crate::LABEL_DEPLOYED_BY.to_string(),
        crate::DEPLOYED_BY_DECKHAND.to_string(),
    );
    labels
}

/// Pod selector labels for an application: just `app=<name>`
pub fn app_labels(app: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(crate::LABEL_APP.to_string(), app.to_string());
    labels
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for typed resources with a fixed apiVersion and kind.
///
/// Serde fills the `apiVersion`/`kind` fields from these when deserializing.
pub trait HasApiResource {
    /// Full API version (e.g., "security.istio.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "AuthorizationPolicy")
    const KIND: &'static str;
}

/// Build an ApiResource from an apiVersion string and kind.
///
/// The version is used exactly as given.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use deckhand_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// apiVersion for the kinds deckhand patches or deletes by name
///
/// Returns `None` for kinds we never address without a full manifest.
pub fn api_version_for_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "Namespace" | "Service" | "Secret" | "ConfigMap" | "PersistentVolumeClaim"
        | "ServiceAccount" => Some("v1"),
        "Deployment" | "StatefulSet" | "DaemonSet" => Some("apps/v1"),
        "HTTPRoute" => Some("gateway.networking.k8s.io/v1"),
        "AuthorizationPolicy" | "PeerAuthentication" => Some("security.istio.io/v1"),
        "DestinationRule" | "VirtualService" => Some("networking.istio.io/v1"),
        "Ingress" | "NetworkPolicy" => Some("networking.k8s.io/v1"),
        _ => None,
    }
}

/// ApiResource for a kind known to [`api_version_for_kind`]
pub fn api_resource_for_kind(kind: &str) -> Result<ApiResource, Error> {
    api_version_for_kind(kind)
        .map(|v| build_api_resource(v, kind))
        .ok_or_else(|| Error::input_for_field("kind", format!("unsupported kind '{}'", kind)))
}

/// Whether a kind lives outside any namespace
///
/// Covers the built-in cluster-scoped kinds and the common add-on ones.
/// Anything else is treated as namespaced unless API discovery says otherwise.
pub fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "CustomResourceDefinition",
    "APIService",
    "ClusterRole",
    "ClusterRoleBinding",
    "StorageClass",
    "CSIDriver",
    "CSINode",
    "VolumeAttachment",
    "IngressClass",
    "RuntimeClass",
    "PriorityClass",
    "PriorityLevelConfiguration",
    "FlowSchema",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "CertificateSigningRequest",
    "GatewayClass",
    "ClusterIssuer",
    "ClusterSecretStore",
    "VolumeSnapshotClass",
];

/// Whether the API server understands strategic merge patches for this kind
///
/// Only built-in types do; custom resources fall back to JSON merge.
pub fn supports_strategic_merge(api_version: &str) -> bool {
    let (group, _) = parse_api_version(api_version);
    matches!(
        group.as_str(),
        "" | "apps" | "batch" | "networking.k8s.io" | "policy" | "rbac.authorization.k8s.io"
    )
}

// =============================================================================
// Manifest metadata
// =============================================================================

/// Identity of a manifest object, extracted from its JSON
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Optional namespace
    pub namespace: Option<String>,
    /// API resource definition
    pub api_resource: ApiResource,
}

/// Extract apiVersion, kind, name and namespace from a manifest object
pub fn manifest_metadata(value: &Value) -> Result<ManifestMetadata, Error> {
    let api_version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::input_for_field("apiVersion", "manifest missing apiVersion"))?;

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::input_for_field("kind", "manifest missing kind"))?;

    let name = value
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::input_for_field("metadata.name", format!("{} manifest missing metadata.name", kind))
        })?;

    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Ok(ManifestMetadata {
        kind: kind.to_string(),
        name: name.to_string(),
        namespace,
        api_resource: build_api_resource(api_version, kind),
    })
}

/// Apply ordering for manifests: lower values are declared first.
///
/// Mesh security policies go before workloads so pods never start under a
/// stricter mTLS mode than the one we intend.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" | "PersistentVolumeClaim" => 5,
        "PeerAuthentication" | "AuthorizationPolicy" | "DestinationRule" | "NetworkPolicy" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" | "Job" | "CronJob" => 8,
        "HTTPRoute" | "Ingress" | "VirtualService" => 9,
        _ => 10,
    }
}

/// Plurals that the suffix rules below get wrong
const KIND_PLURALS: &[(&str, &str)] = &[("endpoints", "endpoints")];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_carries_standard_labels() {
        let meta = ObjectMeta::new("web", "apps");
        assert_eq!(meta.labels.get("app"), Some(&"web".to_string()));
        assert_eq!(meta.labels.get("deployed-by"), Some(&"deckhand".to_string()));
    }

    #[test]
    fn companion_meta_points_at_owning_app() {
        let meta = ObjectMeta::for_app("web-data", "apps", "web");
        assert_eq!(meta.name, "web-data");
        assert_eq!(meta.labels.get("app"), Some(&"web".to_string()));
    }

    #[test]
    fn object_meta_serializes_without_empty_annotations() {
        let json = serde_json::to_value(ObjectMeta::new("web", "apps")).unwrap();
        assert!(json.get("annotations").is_none());
        assert_eq!(json["labels"]["app"], "web");
    }

    #[test]
    fn pluralizes_the_kinds_we_manage() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("AuthorizationPolicy"), "authorizationpolicies");
        assert_eq!(pluralize_kind("HTTPRoute"), "httproutes");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
    }

    #[test]
    fn builds_api_resource_for_core_and_grouped_kinds() {
        let ar = build_api_resource("v1", "Service");
        assert_eq!(ar.group, "");
        assert_eq!(ar.plural, "services");

        let ar = api_resource_for_kind("DestinationRule").unwrap();
        assert_eq!(ar.group, "networking.istio.io");
        assert_eq!(ar.version, "v1");

        assert!(api_resource_for_kind("Widget").is_err());
    }

    #[test]
    fn webhook_and_api_registrations_are_cluster_scoped() {
        for kind in ["ValidatingWebhookConfiguration", "MutatingWebhookConfiguration", "APIService", "Namespace"] {
            assert!(is_cluster_scoped(kind), "{kind}");
        }
        for kind in ["Deployment", "Secret", "HTTPRoute", "Widget"] {
            assert!(!is_cluster_scoped(kind), "{kind}");
        }
    }

    #[test]
    fn strategic_merge_only_for_builtin_groups() {
        assert!(supports_strategic_merge("apps/v1"));
        assert!(supports_strategic_merge("v1"));
        assert!(!supports_strategic_merge("security.istio.io/v1"));
        assert!(!supports_strategic_merge("gateway.networking.k8s.io/v1"));
    }

    #[test]
    fn manifest_metadata_requires_identity_fields() {
        let value = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"}
        });
        let meta = manifest_metadata(&value).unwrap();
        assert_eq!(meta.kind, "Deployment");
        assert_eq!(meta.namespace.as_deref(), Some("prod"));

        let missing = serde_json::json!({"apiVersion": "v1", "kind": "Service"});
        let err = manifest_metadata(&missing).unwrap_err();
        assert_eq!(err.field(), Some("metadata.name"));
    }

    #[test]
    fn namespaces_sort_first_and_routes_last() {
        let mut kinds = vec!["HTTPRoute", "Deployment", "Service", "Namespace", "Secret"];
        kinds.sort_by_key(|k| kind_priority(k));
        assert_eq!(
            kinds,
            vec!["Namespace", "Secret", "Service", "Deployment", "HTTPRoute"]
        );
    }
}
