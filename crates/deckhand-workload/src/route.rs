//! Gateway API HTTPRoute for north-south exposure

use deckhand_common::kube_utils::{HasApiResource, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Kubernetes Gateway API HTTPRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API version (gateway.networking.k8s.io/v1)
    #[serde(default = "HttpRoute::default_api_version")]
    pub api_version: String,
    /// Resource kind (HTTPRoute)
    #[serde(default = "HttpRoute::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// HTTPRoute specification
    pub spec: HttpRouteSpec,
}

impl HasApiResource for HttpRoute {
    const API_VERSION: &'static str = "gateway.networking.k8s.io/v1";
    const KIND: &'static str = "HTTPRoute";
}

impl_api_defaults!(HttpRoute);

impl HttpRoute {
    /// Create a new HTTPRoute
    pub fn new(metadata: ObjectMeta, spec: HttpRouteSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }

    /// Route every path on `hostname` to `service:port` through `gateway`.
    pub fn to_service(
        metadata: ObjectMeta,
        gateway: ParentRef,
        hostname: impl Into<String>,
        service: impl Into<String>,
        port: u16,
    ) -> Self {
        Self::new(
            metadata,
            HttpRouteSpec {
                parent_refs: vec![gateway],
                hostnames: vec![hostname.into()],
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch {
                            type_: "PathPrefix".to_string(),
                            value: "/".to_string(),
                        }),
                    }],
                    backend_refs: vec![BackendRef {
                        kind: Some("Service".to_string()),
                        name: service.into(),
                        port,
                    }],
                }],
            },
        )
    }

    /// First hostname the route binds
    pub fn hostname(&self) -> Option<&str> {
        self.spec.hostnames.first().map(String::as_str)
    }
}

/// HTTPRoute spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parent gateway references
    pub parent_refs: Vec<ParentRef>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    pub rules: Vec<HttpRouteRule>,
}

/// Parent reference for route resources
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// API group (gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Resource kind (Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Gateway name
    pub name: String,
    /// Gateway namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ParentRef {
    /// Create a reference to a Gateway
    pub fn gateway(name: &str, namespace: &str) -> Self {
        Self {
            group: Some("gateway.networking.k8s.io".to_string()),
            kind: Some("Gateway".to_string()),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }
}

/// HTTPRoute rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Request matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// HTTP route match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
}

/// HTTP path match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpPathMatch {
    /// Match type (PathPrefix, Exact)
    #[serde(rename = "type")]
    pub type_: String,
    /// Path value
    pub value: String,
}

/// Backend reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackendRef {
    /// Resource kind (Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Service name
    pub name: String,
    /// Service port
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_binds_hostname_to_service_through_gateway() {
        let route = HttpRoute::to_service(
            ObjectMeta::new("web", "apps"),
            ParentRef::gateway("user-gateway", "istio-system"),
            "web.example.com",
            "web",
            8080,
        );
        assert_eq!(route.hostname(), Some("web.example.com"));

        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["apiVersion"], "gateway.networking.k8s.io/v1");
        assert_eq!(json["kind"], "HTTPRoute");
        assert_eq!(json["spec"]["parentRefs"][0]["name"], "user-gateway");
        assert_eq!(json["spec"]["parentRefs"][0]["namespace"], "istio-system");
        assert_eq!(json["spec"]["rules"][0]["matches"][0]["path"]["type"], "PathPrefix");
        assert_eq!(json["spec"]["rules"][0]["backendRefs"][0]["name"], "web");
        assert_eq!(json["spec"]["rules"][0]["backendRefs"][0]["port"], 8080);
    }
}
