//! Identity-provider client registration
//!
//! OIDC-capable applications get a confidential client in the platform
//! realm. The provider is optional infrastructure: if it cannot be reached,
//! or its admin credentials are not present, registration returns `None` and
//! the deployment keeps password-only credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckhand_common::Error;
use rand::RngCore;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

#[cfg(test)]
use mockall::automock;

use crate::config::DeployerConfig;
use crate::control_plane::ControlPlane;

/// Client used for the admin password grant
const ADMIN_CLIENT_ID: &str = "admin-cli";

/// Default HTTP timeout for admin API calls
pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered OIDC client
#[derive(Clone)]
pub struct OidcClient {
    /// Client id (the application name)
    pub client_id: String,
    /// Client secret (zeroized on drop)
    pub client_secret: Zeroizing<String>,
    /// Issuer URL applications validate tokens against
    pub issuer: String,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Registers OIDC clients with an identity provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register (or look up) the client for `app`
    ///
    /// Returns `Ok(None)` when no provider is reachable.
    async fn register_client(
        &self,
        app: &str,
        redirect_uris: &[String],
    ) -> Result<Option<OidcClient>, Error>;
}

/// Provider used when identity integration is switched off
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIdentityProvider;

#[async_trait]
impl IdentityProvider for NoIdentityProvider {
    async fn register_client(
        &self,
        _app: &str,
        _redirect_uris: &[String],
    ) -> Result<Option<OidcClient>, Error> {
        Ok(None)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ClientSummary {
    id: String,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

/// Outcome of one admin API call
enum Call<T> {
    Done(T),
    Unreachable,
}

/// [`IdentityProvider`] for a Keycloak admin API
pub struct KeycloakAdmin {
    client: Client,
    control_plane: Arc<dyn ControlPlane>,
    config: crate::config::IdentityConfig,
    issuer_base: String,
}

impl KeycloakAdmin {
    /// Create an admin client from the deployer configuration
    pub fn new(config: &DeployerConfig, control_plane: Arc<dyn ControlPlane>) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(DEFAULT_IDENTITY_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, config, control_plane))
    }

    /// Create an admin client with a custom HTTP client
    pub fn with_client(
        client: Client,
        config: &DeployerConfig,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            client,
            control_plane,
            config: config.identity.clone(),
            issuer_base: config.identity_public_url(),
        }
    }

    fn admin_url(&self, path: &str) -> String {
        format!(
            "{}/admin/realms/{}{}",
            self.config.url.trim_end_matches('/'),
            self.config.realm,
            path
        )
    }

    fn issuer(&self) -> String {
        format!("{}/realms/{}", self.issuer_base.trim_end_matches('/'), self.config.realm)
    }

    async fn admin_credentials(&self) -> Result<Option<(String, Zeroizing<String>)>, Error> {
        let Some(mut data) = self
            .control_plane
            .read_secret(&self.config.admin_secret_namespace, &self.config.admin_secret_name)
            .await?
        else {
            return Ok(None);
        };
        let user = data.remove(&self.config.admin_user_key);
        let password = data.remove(&self.config.admin_password_key);
        Ok(user.zip(password).map(|(u, p)| (u, Zeroizing::new(p))))
    }

    async fn admin_token(&self, user: &str, password: &str) -> Result<Call<Zeroizing<String>>, Error> {
        let url = format!(
            "{}/realms/master/protocol/openid-connect/token",
            self.config.url.trim_end_matches('/')
        );
        let form = [
            ("grant_type", "password"),
            ("client_id", ADMIN_CLIENT_ID),
            ("username", user),
            ("password", password),
        ];
        let response = match self.client.post(&url).form(&form).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => return Ok(Call::Unreachable),
            Err(e) => return Err(Error::upstream("identity token", e.to_string())),
        };
        if !response.status().is_success() {
            return Err(Error::upstream(
                "identity token",
                format!("HTTP {}", response.status()),
            ));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream("identity token", e.to_string()))?;
        Ok(Call::Done(Zeroizing::new(token.access_token)))
    }

    async fn existing_secret(&self, token: &str, app: &str) -> Result<Zeroizing<String>, Error> {
        let operation = format!("identity lookup {}", app);
        let clients: Vec<ClientSummary> = self
            .client
            .get(self.admin_url("/clients"))
            .query(&[("clientId", app)])
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::upstream(&operation, e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::upstream(&operation, e.to_string()))?;

        let id = clients
            .first()
            .map(|c| c.id.clone())
            .ok_or_else(|| Error::upstream(&operation, "client exists but cannot be listed"))?;

        let secret: ClientSecret = self
            .client
            .get(self.admin_url(&format!("/clients/{}/client-secret", id)))
            .bearer_auth(token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::upstream(&operation, e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::upstream(&operation, e.to_string()))?;
        Ok(Zeroizing::new(secret.value))
    }
}

#[async_trait]
impl IdentityProvider for KeycloakAdmin {
    async fn register_client(
        &self,
        app: &str,
        redirect_uris: &[String],
    ) -> Result<Option<OidcClient>, Error> {
        if !self.config.enabled {
            return Ok(None);
        }

        let Some((user, password)) = self.admin_credentials().await? else {
            warn!(app = %app, "identity admin credentials not found, skipping OIDC client");
            return Ok(None);
        };

        let token = match self.admin_token(&user, &password).await? {
            Call::Done(token) => token,
            Call::Unreachable => {
                warn!(app = %app, url = %self.config.url, "identity provider unreachable, skipping OIDC client");
                return Ok(None);
            }
        };

        let secret = generate_client_secret();
        let body = client_representation(app, &secret, redirect_uris);
        let operation = format!("identity register {}", app);

        let response = match self
            .client
            .post(self.admin_url("/clients"))
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => return Ok(None),
            Err(e) => return Err(Error::upstream(operation, e.to_string())),
        };

        let client_secret = match response.status() {
            s if s.is_success() => {
                info!(app = %app, "registered OIDC client");
                secret
            }
            StatusCode::CONFLICT => {
                debug!(app = %app, "OIDC client exists, reusing its secret");
                self.existing_secret(&token, app).await?
            }
            s => return Err(Error::upstream(operation, format!("HTTP {}", s))),
        };

        Ok(Some(OidcClient {
            client_id: app.to_string(),
            client_secret,
            issuer: self.issuer(),
        }))
    }
}

/// Redirect URIs for an app served at `hostname`
pub fn redirect_uris(hostname: &str) -> Vec<String> {
    vec![
        format!("https://{}/*", hostname),
        format!("http://{}/*", hostname),
    ]
}

/// 64 hex characters of randomness
pub fn generate_client_secret() -> Zeroizing<String> {
    let mut raw = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(&mut raw[..]);
    Zeroizing::new(raw.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Confidential client body for the admin API
pub fn client_representation(app: &str, secret: &str, redirect_uris: &[String]) -> Value {
    let web_origins: Vec<String> = redirect_uris
        .iter()
        .map(|uri| uri.trim_end_matches("/*").to_string())
        .collect();
    json!({
        "clientId": app,
        "name": app,
        "enabled": true,
        "protocol": "openid-connect",
        "clientAuthenticatorType": "client-secret",
        "secret": secret,
        "publicClient": false,
        "standardFlowEnabled": true,
        "directAccessGrantsEnabled": false,
        "redirectUris": redirect_uris,
        "webOrigins": web_origins,
        "defaultClientScopes": ["openid", "profile", "email"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::MockControlPlane;
    use std::collections::BTreeMap;

    fn config_with_url(url: &str) -> DeployerConfig {
        let mut config = DeployerConfig::default();
        config.domain = "apps.example.com".to_string();
        config.identity.url = url.to_string();
        config
    }

    #[test]
    fn redirects_cover_the_assigned_hostname() {
        let uris = redirect_uris("grafana.apps.example.com");
        assert_eq!(uris[0], "https://grafana.apps.example.com/*");
        assert_eq!(uris.len(), 2);
    }

    #[test]
    fn client_body_is_confidential_with_our_secret() {
        let body = client_representation("grafana", "abc", &redirect_uris("g.example.com"));
        assert_eq!(body["clientId"], "grafana");
        assert_eq!(body["secret"], "abc");
        assert_eq!(body["publicClient"], false);
        assert_eq!(body["webOrigins"][0], "https://g.example.com");
    }

    #[test]
    fn client_secrets_are_64_hex_chars() {
        let secret = generate_client_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let client = OidcClient {
            client_id: "grafana".to_string(),
            client_secret: Zeroizing::new("s3cr3t".to_string()),
            issuer: "https://keycloak.example.com/realms/deckhand".to_string(),
        };
        assert!(!format!("{:?}", client).contains("s3cr3t"));
    }

    // =========================================================================
    // Story: A missing provider degrades to password-only credentials
    // =========================================================================

    #[tokio::test]
    async fn missing_admin_secret_skips_registration() {
        let mut cp = MockControlPlane::new();
        cp.expect_read_secret().returning(|_, _| Ok(None));

        let admin = KeycloakAdmin::new(&config_with_url("http://127.0.0.1:1"), Arc::new(cp)).unwrap();
        let client = admin
            .register_client("grafana", &redirect_uris("grafana.apps.example.com"))
            .await
            .unwrap();
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn unreachable_provider_skips_registration() {
        let mut cp = MockControlPlane::new();
        cp.expect_read_secret().returning(|_, _| {
            let mut data = BTreeMap::new();
            data.insert("admin-user".to_string(), "admin".to_string());
            data.insert("admin-password".to_string(), "pw".to_string());
            Ok(Some(data))
        });

        let admin = KeycloakAdmin::new(&config_with_url("http://127.0.0.1:1"), Arc::new(cp)).unwrap();
        let client = admin
            .register_client("grafana", &redirect_uris("grafana.apps.example.com"))
            .await
            .unwrap();
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn disabled_provider_makes_no_calls() {
        let mut config = config_with_url("http://127.0.0.1:1");
        config.identity.enabled = false;
        let admin = KeycloakAdmin::new(&config, Arc::new(MockControlPlane::new())).unwrap();
        assert!(admin.register_client("grafana", &[]).await.unwrap().is_none());
    }

    #[test]
    fn issuer_uses_public_url_and_realm() {
        let admin = KeycloakAdmin::new(
            &config_with_url("http://keycloak:8080"),
            Arc::new(MockControlPlane::new()),
        )
        .unwrap();
        assert_eq!(
            admin.issuer(),
            "https://keycloak.apps.example.com/realms/deckhand"
        );
    }
}
