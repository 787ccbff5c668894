//! Kubernetes resource types for synthesized workloads

use std::collections::BTreeMap;

use deckhand_common::kube_utils::{app_labels, HasApiResource, ObjectMeta};
use serde::{Deserialize, Serialize};

// =============================================================================
// Namespace
// =============================================================================

/// Metadata for cluster-scoped objects
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObjectMeta {
    /// Object name
    pub name: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Kubernetes Namespace
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    /// API version
    #[serde(default = "Namespace::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Namespace::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ClusterObjectMeta,
}

impl HasApiResource for Namespace {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Namespace";
}

impl_api_defaults!(Namespace);

impl Namespace {
    /// Namespace labelled as managed by deckhand, with sidecar injection
    /// switched on when `mesh` is set.
    pub fn managed(name: impl Into<String>, mesh: bool) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(
            deckhand_common::LABEL_DEPLOYED_BY.to_string(),
            deckhand_common::DEPLOYED_BY_DECKHAND.to_string(),
        );
        if mesh {
            labels.insert(
                deckhand_common::LABEL_MESH_INJECTION.to_string(),
                "enabled".to_string(),
            );
        }
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ClusterObjectMeta {
                name: name.into(),
                labels,
            },
        }
    }
}

// =============================================================================
// Secret
// =============================================================================

/// Kubernetes Secret for sensitive configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    /// API version
    #[serde(default = "Secret::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Secret::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// String data (auto-encoded to base64 by K8s)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
    /// Secret type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

impl HasApiResource for Secret {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";
}

impl_api_defaults!(Secret);

impl Secret {
    /// Create an empty Opaque secret
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            string_data: BTreeMap::new(),
            type_: Some("Opaque".to_string()),
        }
    }

    /// Add a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Container
// =============================================================================

/// Reference to a Secret for loading env vars
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvFromSource {
    /// Secret reference
    pub secret_ref: SecretEnvSource,
}

impl EnvFromSource {
    /// Load every key of `secret` as an env var
    pub fn secret(secret: impl Into<String>) -> Self {
        Self {
            secret_ref: SecretEnvSource {
                name: secret.into(),
            },
        }
    }
}

/// Secret named by an [`EnvFromSource`]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecretEnvSource {
    /// Secret name
    pub name: String,
}

/// Environment variable with a literal value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Value
    pub value: String,
}

impl EnvVar {
    /// Create an env var with a literal value
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub container_port: u16,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Volume mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name
    pub name: String,
    /// Mount path
    pub mount_path: String,
    /// Mount read-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

/// Container spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Command (overrides the image entrypoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Args
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Environment from Secret references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

// =============================================================================
// Volumes
// =============================================================================

/// Pod volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// EmptyDir source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    /// PVC source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcVolumeSource>,
}

impl Volume {
    /// Create a Volume backed by an emptyDir.
    pub fn from_empty_dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            empty_dir: Some(EmptyDirVolumeSource {}),
            persistent_volume_claim: None,
        }
    }

    /// Create a Volume backed by a PVC.
    pub fn from_pvc(name: impl Into<String>, claim_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            empty_dir: None,
            persistent_volume_claim: Some(PvcVolumeSource {
                claim_name: claim_name.into(),
            }),
        }
    }
}

/// EmptyDir volume source
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EmptyDirVolumeSource {}

/// PVC volume source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSource {
    /// PVC claim name
    pub claim_name: String,
}

/// Kubernetes PersistentVolumeClaim
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaim {
    /// API version (v1)
    #[serde(default = "PersistentVolumeClaim::default_api_version")]
    pub api_version: String,
    /// Resource kind (PersistentVolumeClaim)
    #[serde(default = "PersistentVolumeClaim::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// PVC spec
    pub spec: PvcSpec,
}

impl HasApiResource for PersistentVolumeClaim {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "PersistentVolumeClaim";
}

impl_api_defaults!(PersistentVolumeClaim);

impl PersistentVolumeClaim {
    /// Single-writer claim of `size` on `storage_class`
    pub fn read_write_once(metadata: ObjectMeta, size: &str, storage_class: Option<&str>) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec: PvcSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                resources: PvcResources {
                    requests: PvcStorage {
                        storage: size.to_string(),
                    },
                },
                storage_class_name: storage_class.map(String::from),
            },
        }
    }
}

/// PVC spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    /// Access modes (ReadWriteOnce, ReadWriteMany, ReadOnlyMany)
    pub access_modes: Vec<String>,
    /// Resource requirements
    pub resources: PvcResources,
    /// Storage class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// PVC resource requirements
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PvcResources {
    /// Storage requests
    pub requests: PvcStorage,
}

/// PVC storage request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PvcStorage {
    /// Storage size (e.g., "10Gi")
    pub storage: String,
}

// =============================================================================
// Deployment
// =============================================================================

/// Label selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Labels that must match
    pub match_labels: BTreeMap<String, String>,
}

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    #[serde(default = "Deployment::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Deployment::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

impl HasApiResource for Deployment {
    const API_VERSION: &'static str = "apps/v1";
    const KIND: &'static str = "Deployment";
}

impl_api_defaults!(Deployment);

impl Deployment {
    /// Create a Deployment running `pod` with `replicas` copies
    pub fn new(metadata: ObjectMeta, replicas: u32, pod: PodSpec) -> Self {
        let selector = app_labels(&metadata.name);
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            spec: DeploymentSpec {
                replicas,
                selector: LabelSelector {
                    match_labels: selector,
                },
                template: PodTemplateSpec {
                    metadata: PodMeta {
                        labels: metadata.labels.clone(),
                    },
                    spec: pod,
                },
            },
            metadata,
        }
    }

    /// The primary container (named after the Deployment)
    pub fn primary_container(&self) -> Option<&Container> {
        self.spec
            .template
            .spec
            .containers
            .iter()
            .find(|c| c.name == self.metadata.name)
            .or_else(|| self.spec.template.spec.containers.first())
    }
}

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: u32,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (subset of ObjectMeta)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    pub containers: Vec<Container>,
    /// Volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    #[serde(default = "Service::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Service::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

impl HasApiResource for Service {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Service";
}

impl_api_defaults!(Service);

impl Service {
    /// ClusterIP service selecting the pods of `metadata.name`
    pub fn cluster_ip(metadata: ObjectMeta, ports: Vec<ServicePort>) -> Self {
        let selector = app_labels(&metadata.name);
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec: ServiceSpec {
                selector,
                ports,
                type_: Some("ClusterIP".to_string()),
            },
        }
    }

    /// The first service port, used as the route backend
    pub fn primary_port(&self) -> Option<u16> {
        self.spec.ports.first().map(|p| p.port)
    }
}

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
    /// Service type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub port: u16,
    /// Target port
    pub target_port: u16,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_labels_follow_mesh_setting() {
        let ns = Namespace::managed("media", true);
        assert_eq!(ns.metadata.labels.get("istio-injection").map(String::as_str), Some("enabled"));
        assert_eq!(ns.metadata.labels.get("deployed-by").map(String::as_str), Some("deckhand"));

        let ns = Namespace::managed("media", false);
        assert!(!ns.metadata.labels.contains_key("istio-injection"));

        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["apiVersion"], "v1");
        assert_eq!(json["kind"], "Namespace");
        assert!(json["metadata"].get("namespace").is_none());
    }

    #[test]
    fn secret_serializes_string_data_and_type() {
        let secret = Secret::new(ObjectMeta::for_app("web-credentials", "apps", "web"))
            .with_data("PASSWORD", "pw");
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["type"], "Opaque");
        assert_eq!(json["stringData"]["PASSWORD"], "pw");
        assert_eq!(json["metadata"]["labels"]["app"], "web");
    }

    #[test]
    fn pvc_serializes_claim_fields() {
        let pvc = PersistentVolumeClaim::read_write_once(
            ObjectMeta::for_app("web-data", "apps", "web"),
            "5Gi",
            Some("longhorn"),
        );
        let json = serde_json::to_value(&pvc).unwrap();
        assert_eq!(json["spec"]["accessModes"][0], "ReadWriteOnce");
        assert_eq!(json["spec"]["resources"]["requests"]["storage"], "5Gi");
        assert_eq!(json["spec"]["storageClassName"], "longhorn");
    }

    #[test]
    fn deployment_selector_uses_app_label_only() {
        let container = Container {
            name: "web".to_string(),
            image: "nginx".to_string(),
            command: None,
            args: None,
            env: vec![],
            env_from: vec![],
            ports: vec![],
            volume_mounts: vec![],
        };
        let deployment = Deployment::new(
            ObjectMeta::new("web", "apps"),
            1,
            PodSpec {
                containers: vec![container],
                volumes: vec![],
            },
        );
        let json = serde_json::to_value(&deployment).unwrap();
        assert_eq!(json["spec"]["selector"]["matchLabels"]["app"], "web");
        assert!(json["spec"]["selector"]["matchLabels"].get("deployed-by").is_none());
        assert_eq!(json["spec"]["template"]["metadata"]["labels"]["deployed-by"], "deckhand");
        assert_eq!(deployment.primary_container().map(|c| c.image.as_str()), Some("nginx"));
    }

    #[test]
    fn deserializing_fills_in_api_defaults() {
        let json = serde_json::json!({
            "metadata": {"name": "web", "namespace": "apps"},
            "spec": {"selector": {"app": "web"}, "ports": [{"port": 80, "targetPort": 8080}]}
        });
        let service: Service = serde_json::from_value(json).unwrap();
        assert_eq!(service.api_version, "v1");
        assert_eq!(service.kind, "Service");
        assert_eq!(service.primary_port(), Some(80));
    }
}
