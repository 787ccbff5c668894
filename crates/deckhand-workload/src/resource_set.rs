//! The canonical object set for one application

use deckhand_common::kube_utils::kind_priority;
use deckhand_common::{Error, LABEL_PROJECT};
use serde::Serialize;
use serde_json::Value;

use crate::k8s::{Deployment, PersistentVolumeClaim, Secret, Service};
use crate::policy::{AuthorizationPolicy, DestinationRule, PeerAuthentication};
use crate::route::HttpRoute;

/// Mesh traffic policies for one application
#[derive(Clone, Debug, PartialEq)]
pub struct MeshPolicies {
    /// Connection limits and outlier ejection
    pub destination_rule: DestinationRule,
    /// mTLS mode
    pub peer_authentication: PeerAuthentication,
}

/// Everything declared for one application.
///
/// `workload` and `service` always exist; the rest are filled in as
/// integrations run.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceSet {
    /// The Deployment
    pub workload: Deployment,
    /// The ClusterIP Service in front of it
    pub service: Service,
    /// Persistent storage claim
    pub claim: Option<PersistentVolumeClaim>,
    /// Object-storage credential secret
    pub secret: Option<Secret>,
    /// North-south route
    pub route: Option<HttpRoute>,
    /// External authorization policy
    pub access_policy: Option<AuthorizationPolicy>,
    /// Mesh policies
    pub mesh: Option<MeshPolicies>,
}

impl ResourceSet {
    /// A set holding just the workload and its service
    pub fn new(workload: Deployment, service: Service) -> Self {
        Self {
            workload,
            service,
            claim: None,
            secret: None,
            route: None,
            access_policy: None,
            mesh: None,
        }
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.workload.metadata.name
    }

    /// Target namespace
    pub fn namespace(&self) -> &str {
        &self.workload.metadata.namespace
    }

    /// Tag the workload and service as members of a compose project so the
    /// whole project can be found and deleted together.
    pub fn with_project(mut self, project: &str) -> Self {
        for labels in [
            &mut self.workload.metadata.labels,
            &mut self.service.metadata.labels,
        ] {
            labels.insert(LABEL_PROJECT.to_string(), project.to_string());
        }
        self
    }

    /// Every present object as JSON, in apply order
    pub fn objects(&self) -> Result<Vec<Value>, Error> {
        let mut objects = vec![to_value(&self.workload)?, to_value(&self.service)?];
        if let Some(claim) = &self.claim {
            objects.push(to_value(claim)?);
        }
        if let Some(secret) = &self.secret {
            objects.push(to_value(secret)?);
        }
        if let Some(route) = &self.route {
            objects.push(to_value(route)?);
        }
        if let Some(policy) = &self.access_policy {
            objects.push(to_value(policy)?);
        }
        if let Some(mesh) = &self.mesh {
            objects.push(to_value(&mesh.destination_rule)?);
            objects.push(to_value(&mesh.peer_authentication)?);
        }
        objects.sort_by_key(|o| kind_priority(o["kind"].as_str().unwrap_or_default()));
        Ok(objects)
    }
}

/// A partial update to an existing object
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatch {
    /// Kind of the patched object
    pub kind: String,
    /// Name of the patched object
    pub name: String,
    /// Namespace of the patched object
    pub namespace: String,
    /// Patch body; list merging follows the kind's strategic merge keys
    pub body: Value,
}

impl ObjectPatch {
    /// Patch for a Deployment
    pub fn deployment(name: impl Into<String>, namespace: impl Into<String>, body: Value) -> Self {
        Self {
            kind: "Deployment".to_string(),
            name: name.into(),
            namespace: namespace.into(),
            body,
        }
    }
}

/// Serialize a typed object, naming its kind on failure
pub fn to_value<T: Serialize>(object: &T) -> Result<Value, Error> {
    serde_json::to_value(object).map_err(|e| {
        let kind = std::any::type_name::<T>()
            .rsplit("::")
            .next()
            .unwrap_or("object");
        Error::serialization_for_kind(kind, e.to_string())
    })
}
