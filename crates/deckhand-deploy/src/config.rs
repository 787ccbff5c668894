//! Deployer configuration
//!
//! Everything environment-specific lives in one [`DeployerConfig`] handed to
//! the orchestrator at construction. Every field has a default, so a YAML file
//! only needs the values that differ.

use std::path::Path;
use std::time::Duration;

use deckhand_common::yaml::parse_yaml;
use deckhand_common::Error;
use serde::{Deserialize, Serialize};

/// Default platform domain for generated hostnames
pub const DEFAULT_DOMAIN: &str = "deckhand.local";

/// Default namespace for the credential vault
pub const DEFAULT_VAULT_NAMESPACE: &str = "deckhand-credentials";

/// Top-level deployer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployerConfig {
    /// Platform domain; default hostnames are `<app>.<domain>`
    pub domain: String,
    /// Storage class for data claims (`None` uses the cluster default)
    pub storage_class: Option<String>,
    /// Claim size when storage is requested without one
    pub default_storage_size: String,
    /// Mount path when storage is requested without one
    pub default_mount_path: String,
    /// Namespace holding credential records
    pub vault_namespace: String,
    /// Gateways per exposure tier
    pub gateways: GatewayConfig,
    /// Shared object-storage root credentials
    pub object_storage: ObjectStorageConfig,
    /// Identity provider for OIDC client registration
    pub identity: IdentityConfig,
    /// External authorizer named in access policies
    pub auth_provider: String,
    /// Whether the cluster runs a service mesh
    pub mesh_enabled: bool,
    /// Bound on every control-plane and chart call, in seconds
    pub upstream_timeout_secs: u64,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            storage_class: Some("longhorn".to_string()),
            default_storage_size: "10Gi".to_string(),
            default_mount_path: "/data".to_string(),
            vault_namespace: DEFAULT_VAULT_NAMESPACE.to_string(),
            gateways: GatewayConfig::default(),
            object_storage: ObjectStorageConfig::default(),
            identity: IdentityConfig::default(),
            auth_provider: "oauth2-proxy".to_string(),
            mesh_enabled: true,
            upstream_timeout_secs: 300,
        }
    }
}

impl DeployerConfig {
    /// Parse a YAML configuration document
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        let value = parse_yaml(text).map_err(|e| Error::config(e.to_string()))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| Error::config(format!("invalid deployer configuration: {}", e)))
    }

    /// Load a YAML configuration file
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml(&text)
    }

    /// Upstream call bound
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// `<label>.<domain>`
    pub fn hostname_for(&self, label: &str) -> String {
        format!("{}.{}", label, self.domain)
    }

    /// Public issuer base of the identity provider
    pub fn identity_public_url(&self) -> String {
        self.identity
            .public_url
            .clone()
            .unwrap_or_else(|| format!("https://{}", self.hostname_for("keycloak")))
    }
}

/// Gateways routes attach to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Namespace of every gateway
    pub namespace: String,
    /// Identity-protected gateway for end users
    pub user: String,
    /// Restricted gateway for administrators
    pub admin: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace: "istio-system".to_string(),
            user: "user-gateway".to_string(),
            admin: "admin-gateway".to_string(),
        }
    }
}

/// Where the shared object-storage root credentials live
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStorageConfig {
    /// Namespace of the root credential secret
    pub namespace: String,
    /// Name of the root credential secret
    pub secret: String,
    /// Key holding the access key
    pub access_key_field: String,
    /// Key holding the secret key
    pub secret_key_field: String,
    /// Endpoint applications connect to
    pub endpoint: String,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            namespace: "minio".to_string(),
            secret: "minio-credentials".to_string(),
            access_key_field: "rootUser".to_string(),
            secret_key_field: "rootPassword".to_string(),
            endpoint: "http://minio.minio.svc.cluster.local:9000".to_string(),
        }
    }
}

/// Identity provider settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentityConfig {
    /// Register OIDC clients at all
    pub enabled: bool,
    /// In-cluster admin API base URL
    pub url: String,
    /// Public base URL for issuers (defaults to `https://keycloak.<domain>`)
    pub public_url: Option<String>,
    /// Realm clients are registered in
    pub realm: String,
    /// Namespace of the admin credential secret
    pub admin_secret_namespace: String,
    /// Name of the admin credential secret
    pub admin_secret_name: String,
    /// Key holding the admin user
    pub admin_user_key: String,
    /// Key holding the admin password
    pub admin_password_key: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://keycloak.keycloak.svc.cluster.local:8080".to_string(),
            public_url: None,
            realm: "deckhand".to_string(),
            admin_secret_namespace: "keycloak".to_string(),
            admin_secret_name: "keycloak-credentials".to_string(),
            admin_user_key: "admin-user".to_string(),
            admin_password_key: "admin-password".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(DeployerConfig::from_yaml("").unwrap(), DeployerConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = DeployerConfig::from_yaml(
            "domain: apps.example.com\nmeshEnabled: false\ngateways:\n  user: public\n",
        )
        .unwrap();
        assert_eq!(config.domain, "apps.example.com");
        assert!(!config.mesh_enabled);
        assert_eq!(config.gateways.user, "public");
        assert_eq!(config.gateways.namespace, "istio-system");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(300));
        assert_eq!(config.hostname_for("grafana"), "grafana.apps.example.com");
        assert_eq!(config.identity_public_url(), "https://keycloak.apps.example.com");
    }

    #[test]
    fn wrong_types_are_config_errors() {
        let err = DeployerConfig::from_yaml("upstreamTimeoutSecs: soon\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn malformed_yaml_is_config_error() {
        let err = DeployerConfig::from_yaml("domain: [unclosed\n").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
