//! Istio policy types
//!
//! - AuthorizationPolicy: delegates request authorization to an external
//!   provider (CUSTOM action)
//! - PeerAuthentication: mTLS mode for one application's pods
//! - DestinationRule: connection limits and outlier ejection

use std::collections::BTreeMap;

use deckhand_common::kube_utils::{app_labels, HasApiResource, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Workload selector shared by the Istio policy kinds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

impl WorkloadSelector {
    /// Select the pods of one application
    pub fn app(name: &str) -> Self {
        Self {
            match_labels: app_labels(name),
        }
    }
}

// =============================================================================
// AuthorizationPolicy
// =============================================================================

/// Istio AuthorizationPolicy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// API version
    #[serde(default = "AuthorizationPolicy::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AuthorizationPolicy::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: AuthorizationPolicySpec,
}

impl HasApiResource for AuthorizationPolicy {
    const API_VERSION: &'static str = "security.istio.io/v1";
    const KIND: &'static str = "AuthorizationPolicy";
}

impl_api_defaults!(AuthorizationPolicy);

impl AuthorizationPolicy {
    /// Create a new AuthorizationPolicy
    pub fn new(metadata: ObjectMeta, spec: AuthorizationPolicySpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }

    /// Send every request to `app` through the external authorizer `provider`.
    pub fn custom_provider(app: &str, namespace: &str, provider: &str) -> Self {
        Self::new(
            ObjectMeta::for_app(format!("{}-authz", app), namespace, app),
            AuthorizationPolicySpec {
                selector: Some(WorkloadSelector::app(app)),
                action: "CUSTOM".to_string(),
                provider: Some(ExtensionProvider {
                    name: provider.to_string(),
                }),
                rules: vec![AuthorizationRule {
                    to: vec![AuthorizationOperation {
                        operation: OperationSpec {
                            paths: vec!["/*".to_string()],
                        },
                    }],
                }],
            },
        )
    }
}

/// AuthorizationPolicy spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Selector for workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Action: ALLOW, DENY, AUDIT, CUSTOM
    pub action: String,
    /// Extension provider for CUSTOM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ExtensionProvider>,
    /// Rules the action applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthorizationRule>,
}

/// Mesh extension provider reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtensionProvider {
    /// Provider name as registered in mesh config
    pub name: String,
}

/// Authorization rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRule {
    /// Destination conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<AuthorizationOperation>,
}

/// Authorization operation (what's being accessed)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationOperation {
    /// Operation specification
    pub operation: OperationSpec,
}

/// Operation specification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OperationSpec {
    /// Request paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

// =============================================================================
// PeerAuthentication
// =============================================================================

/// Istio PeerAuthentication for mTLS configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerAuthentication {
    /// API version
    #[serde(default = "PeerAuthentication::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "PeerAuthentication::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: PeerAuthenticationSpec,
}

impl HasApiResource for PeerAuthentication {
    const API_VERSION: &'static str = "security.istio.io/v1";
    const KIND: &'static str = "PeerAuthentication";
}

impl_api_defaults!(PeerAuthentication);

impl PeerAuthentication {
    /// Accept both mTLS and plaintext for one application's pods
    pub fn permissive(app: &str, namespace: &str) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::new(app, namespace),
            spec: PeerAuthenticationSpec {
                selector: Some(WorkloadSelector::app(app)),
                mtls: MtlsConfig {
                    mode: "PERMISSIVE".to_string(),
                },
            },
        }
    }
}

/// PeerAuthentication spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeerAuthenticationSpec {
    /// Pods the mode applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// mTLS configuration
    pub mtls: MtlsConfig,
}

/// mTLS configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MtlsConfig {
    /// mTLS mode: STRICT, PERMISSIVE, DISABLE
    pub mode: String,
}

// =============================================================================
// DestinationRule
// =============================================================================

/// Istio DestinationRule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRule {
    /// API version
    #[serde(default = "DestinationRule::default_api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "DestinationRule::default_kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DestinationRuleSpec,
}

impl HasApiResource for DestinationRule {
    const API_VERSION: &'static str = "networking.istio.io/v1";
    const KIND: &'static str = "DestinationRule";
}

impl_api_defaults!(DestinationRule);

impl DestinationRule {
    /// Default traffic policy for an application's in-cluster service
    pub fn for_service(app: &str, namespace: &str) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta::new(app, namespace),
            spec: DestinationRuleSpec {
                host: format!("{}.{}.svc.cluster.local", app, namespace),
                traffic_policy: TrafficPolicy::default(),
            },
        }
    }
}

/// DestinationRule spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRuleSpec {
    /// Service host the rule applies to
    pub host: String,
    /// Traffic policy
    pub traffic_policy: TrafficPolicy,
}

/// Connection pooling and outlier ejection
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficPolicy {
    /// Connection pool limits
    pub connection_pool: ConnectionPool,
    /// Outlier detection
    pub outlier_detection: OutlierDetection,
}

impl Default for TrafficPolicy {
    fn default() -> Self {
        Self {
            connection_pool: ConnectionPool {
                tcp: TcpSettings {
                    max_connections: 100,
                },
                http: HttpSettings {
                    http1_max_pending_requests: 100,
                    max_requests_per_connection: 10,
                },
            },
            outlier_detection: OutlierDetection {
                consecutive_5xx_errors: 5,
                interval: "30s".to_string(),
                base_ejection_time: "30s".to_string(),
                max_ejection_percent: 50,
            },
        }
    }
}

/// Connection pool settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectionPool {
    /// TCP limits
    pub tcp: TcpSettings,
    /// HTTP limits
    pub http: HttpSettings,
}

/// TCP connection limits
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TcpSettings {
    /// Max connections to a destination host
    pub max_connections: u32,
}

/// HTTP connection limits
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    /// Max queued requests
    pub http1_max_pending_requests: u32,
    /// Max requests per connection
    pub max_requests_per_connection: u32,
}

/// Outlier ejection settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlierDetection {
    /// Consecutive 5xx responses before ejection
    #[serde(rename = "consecutive5xxErrors")]
    pub consecutive_5xx_errors: u32,
    /// Analysis sweep interval
    pub interval: String,
    /// Minimum ejection duration
    pub base_ejection_time: String,
    /// Max percentage of hosts ejected
    pub max_ejection_percent: u32,
}
