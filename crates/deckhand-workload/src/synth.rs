//! Resource synthesis
//!
//! [`synthesize`] builds the Deployment and Service for one application. The
//! remaining functions build what integrations add afterwards: storage claim
//! and mount patch, secrets with their `envFrom` patch, route, mesh and access
//! policies. All output is deterministic so repeated declarations converge.

use std::collections::BTreeMap;

use deckhand_common::kube_utils::ObjectMeta;
use deckhand_source::ports::is_web_port;
use deckhand_source::{PortMapping, Protocol, ResolvedImage, ServiceSpec};
use serde_json::json;
use tracing::debug;

use crate::k8s::{
    Container, ContainerPort, Deployment, EnvFromSource, EnvVar, PersistentVolumeClaim, PodSpec,
    Secret, Service, ServicePort, Volume, VolumeMount,
};
use crate::policy::{AuthorizationPolicy, DestinationRule, PeerAuthentication};
use crate::resource_set::{MeshPolicies, ObjectPatch, ResourceSet};
use crate::route::{HttpRoute, ParentRef};

/// Pod volume name used for the persistent data claim
pub const DATA_VOLUME: &str = "data";

/// Service port direct-image deployments are exposed on
pub const IMAGE_SERVICE_PORT: u16 = 80;

/// What a workload is built from
#[derive(Clone, Copy, Debug)]
pub enum WorkloadSource<'a> {
    /// A translated compose service
    Service(&'a ServiceSpec),
    /// A bare image listening on `port`
    Image {
        /// Image reference
        image: &'a str,
        /// Container port
        port: u16,
    },
    /// A build recipe resolved to a pre-built image
    Resolved(&'a ResolvedImage),
}

/// Build the Deployment and ClusterIP Service for `name` in `namespace`.
pub fn synthesize(name: &str, namespace: &str, source: WorkloadSource<'_>) -> ResourceSet {
    let spec = match source {
        WorkloadSource::Service(spec) => {
            let mut spec = spec.clone();
            spec.name = name.to_string();
            spec
        }
        WorkloadSource::Image { image, port } => image_service(name, image, port, None, None),
        WorkloadSource::Resolved(resolved) => image_service(
            name,
            &resolved.image,
            resolved.port,
            resolved.command.clone(),
            resolved.args.clone(),
        ),
    };

    let ports = if spec.ports.is_empty() {
        vec![spec.primary_port()]
    } else {
        spec.ports.clone()
    };

    let (volumes, volume_mounts) = named_volumes(&spec);
    let container = Container {
        name: name.to_string(),
        image: spec.image.clone(),
        command: spec.command.clone(),
        args: spec.args.clone(),
        env: spec
            .env
            .iter()
            .map(|(k, v)| EnvVar::literal(k, v))
            .collect(),
        env_from: Vec::new(),
        ports: container_ports(&ports),
        volume_mounts,
    };

    let workload = Deployment::new(
        ObjectMeta::new(name, namespace),
        spec.replicas.max(1),
        PodSpec {
            containers: vec![container],
            volumes,
        },
    );
    let service = Service::cluster_ip(ObjectMeta::new(name, namespace), service_ports(&ports));

    debug!(
        app = %name,
        namespace = %namespace,
        image = %spec.image,
        ports = ports.len(),
        "synthesized workload"
    );
    ResourceSet::new(workload, service)
}

fn image_service(
    name: &str,
    image: &str,
    port: u16,
    command: Option<Vec<String>>,
    args: Option<Vec<String>>,
) -> ServiceSpec {
    let mut spec = ServiceSpec::from_image(name, image, port);
    spec.ports = vec![PortMapping::new(IMAGE_SERVICE_PORT, port)];
    spec.command = command;
    spec.args = args;
    spec
}

fn container_ports(ports: &[PortMapping]) -> Vec<ContainerPort> {
    let mut out: Vec<ContainerPort> = Vec::new();
    for mapping in ports {
        let protocol = Some(mapping.protocol.as_str().to_string());
        if out
            .iter()
            .any(|p| p.container_port == mapping.container_port && p.protocol == protocol)
        {
            continue;
        }
        out.push(ContainerPort {
            name: None,
            container_port: mapping.container_port,
            protocol,
        });
    }
    out
}

fn service_ports(ports: &[PortMapping]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|mapping| ServicePort {
            name: Some(port_name(mapping)),
            port: mapping.service_port,
            target_port: mapping.container_port,
            protocol: Some(mapping.protocol.as_str().to_string()),
        })
        .collect()
}

/// `http-<port>` for TCP web ports so the mesh applies L7 policy,
/// `<protocol>-<port>` otherwise.
fn port_name(mapping: &PortMapping) -> String {
    let prefix = match mapping.protocol {
        Protocol::Tcp if is_web_port(mapping.service_port) => "http",
        Protocol::Tcp => "tcp",
        Protocol::Udp => "udp",
        Protocol::Sctp => "sctp",
    };
    format!("{}-{}", prefix, mapping.service_port)
}

fn named_volumes(spec: &ServiceSpec) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes: Vec<Volume> = Vec::new();
    let mut mounts = Vec::new();
    for mount in &spec.volume_mounts {
        if !volumes.iter().any(|v| v.name == mount.volume) {
            volumes.push(Volume::from_empty_dir(&mount.volume));
        }
        mounts.push(VolumeMount {
            name: mount.volume.clone(),
            mount_path: mount.mount_path.clone(),
            read_only: mount.read_only.then_some(true),
        });
    }
    (volumes, mounts)
}

// =============================================================================
// Storage
// =============================================================================

/// Name of the persistent data claim for `app`
pub fn claim_name(app: &str) -> String {
    format!("{}-data", app)
}

/// PersistentVolumeClaim `<app>-data`
pub fn storage_claim(
    app: &str,
    namespace: &str,
    size: &str,
    storage_class: Option<&str>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim::read_write_once(
        ObjectMeta::for_app(claim_name(app), namespace, app),
        size,
        storage_class,
    )
}

/// Strategic merge patch mounting `<app>-data` into the app container.
///
/// Containers merge by name, volumes by name and mounts by path, so applying
/// it twice leaves one mount.
pub fn storage_mount_patch(app: &str, namespace: &str, mount_path: &str) -> ObjectPatch {
    ObjectPatch::deployment(
        app,
        namespace,
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": app,
                            "volumeMounts": [{
                                "name": DATA_VOLUME,
                                "mountPath": mount_path,
                            }],
                        }],
                        "volumes": [Volume::from_pvc(DATA_VOLUME, claim_name(app))],
                    }
                }
            }
        }),
    )
}

// =============================================================================
// Secrets
// =============================================================================

/// Name of the object-storage credential secret for `app`
pub fn object_storage_secret_name(app: &str) -> String {
    format!("{}-objectstorage", app)
}

/// Name of the generated-credential secret for `app`
pub fn credentials_secret_name(app: &str) -> String {
    format!("{}-credentials", app)
}

/// Opaque secret owned by `app` holding `data`
pub fn app_secret(
    app: &str,
    namespace: &str,
    name: impl Into<String>,
    data: &BTreeMap<String, String>,
) -> Secret {
    data.iter().fold(
        Secret::new(ObjectMeta::for_app(name, namespace, app)),
        |secret, (k, v)| secret.with_data(k, v),
    )
}

/// Strategic merge patch loading every listed secret into the app container.
///
/// `envFrom` has no merge key, so the patch carries the complete list.
pub fn env_from_patch(app: &str, namespace: &str, secrets: &[String]) -> ObjectPatch {
    let env_from: Vec<EnvFromSource> = secrets.iter().map(EnvFromSource::secret).collect();
    ObjectPatch::deployment(
        app,
        namespace,
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": [{
                            "name": app,
                            "envFrom": env_from,
                        }],
                    }
                }
            }
        }),
    )
}

// =============================================================================
// Route and policies
// =============================================================================

/// HTTPRoute `<route_name>` sending `hostname` to the app's service port
pub fn route(
    route_name: &str,
    app: &str,
    namespace: &str,
    gateway: ParentRef,
    hostname: &str,
    port: u16,
) -> HttpRoute {
    HttpRoute::to_service(
        ObjectMeta::for_app(route_name, namespace, app),
        gateway,
        hostname,
        app,
        port,
    )
}

/// DestinationRule and PeerAuthentication scoped to `app=<app>`
pub fn mesh_policies(app: &str, namespace: &str) -> MeshPolicies {
    MeshPolicies {
        destination_rule: DestinationRule::for_service(app, namespace),
        peer_authentication: PeerAuthentication::permissive(app, namespace),
    }
}

/// AuthorizationPolicy `<app>-authz` delegating to `provider`
pub fn access_policy(app: &str, namespace: &str, provider: &str) -> AuthorizationPolicy {
    AuthorizationPolicy::custom_provider(app, namespace, provider)
}
