//! Generated application credentials
//!
//! Some applications ask for an admin account on first start. For those we
//! mint a random password up front, hand it to the app through its own env
//! convention where one is known, and keep a copy in the vault.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Serialize, Serializer};
use zeroize::Zeroizing;

/// Username given to generated admin accounts
pub const DEFAULT_USERNAME: &str = "admin";

/// Random bytes behind each generated password
const PASSWORD_BYTES: usize = 24;

/// Applications that need an admin account on first run
pub const NEEDS_CREDENTIALS: &[&str] = &[
    "grafana",
    "nextcloud",
    "gitea",
    "gitlab",
    "wordpress",
    "jenkins",
    "minio",
    "postgres",
    "postgresql",
    "mysql",
    "mariadb",
    "mongodb",
    "pgadmin",
    "portainer",
    "n8n",
    "sonarqube",
    "nexus",
    "harbor",
    "argocd",
    "vaultwarden",
    "outline",
    "mattermost",
];

/// The subset of [`NEEDS_CREDENTIALS`] that can log users in over OIDC
pub const OIDC_CAPABLE: &[&str] = &[
    "grafana",
    "nextcloud",
    "gitea",
    "gitlab",
    "jenkins",
    "minio",
    "portainer",
    "sonarqube",
    "harbor",
    "argocd",
    "outline",
    "mattermost",
];

/// Env var names an application reads its initial admin account from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvConvention {
    /// Username variable
    pub user: &'static str,
    /// Password variable
    pub password: &'static str,
}

const ENV_CONVENTIONS: &[(&str, EnvConvention)] = &[
    ("grafana", EnvConvention { user: "GF_SECURITY_ADMIN_USER", password: "GF_SECURITY_ADMIN_PASSWORD" }),
    ("postgres", EnvConvention { user: "POSTGRES_USER", password: "POSTGRES_PASSWORD" }),
    ("postgresql", EnvConvention { user: "POSTGRES_USER", password: "POSTGRES_PASSWORD" }),
    ("mysql", EnvConvention { user: "MYSQL_USER", password: "MYSQL_PASSWORD" }),
    ("mariadb", EnvConvention { user: "MARIADB_USER", password: "MARIADB_PASSWORD" }),
    ("minio", EnvConvention { user: "MINIO_ROOT_USER", password: "MINIO_ROOT_PASSWORD" }),
    ("mongodb", EnvConvention { user: "MONGO_INITDB_ROOT_USERNAME", password: "MONGO_INITDB_ROOT_PASSWORD" }),
    ("nextcloud", EnvConvention { user: "NEXTCLOUD_ADMIN_USER", password: "NEXTCLOUD_ADMIN_PASSWORD" }),
    ("pgadmin", EnvConvention { user: "PGADMIN_DEFAULT_EMAIL", password: "PGADMIN_DEFAULT_PASSWORD" }),
];

/// True when `app` needs first-run admin credentials
pub fn needs_credentials(app: &str) -> bool {
    NEEDS_CREDENTIALS.contains(&app)
}

/// True when `app` can use an identity-provider client
pub fn is_oidc_capable(app: &str) -> bool {
    OIDC_CAPABLE.contains(&app)
}

/// Env convention for `app`, if it has one
pub fn env_convention(app: &str) -> Option<EnvConvention> {
    ENV_CONVENTIONS
        .iter()
        .find(|(name, _)| *name == app)
        .map(|(_, convention)| *convention)
}

/// Generate a URL-safe random password
pub fn generate_password() -> Zeroizing<String> {
    let mut raw = Zeroizing::new([0u8; PASSWORD_BYTES]);
    rand::thread_rng().fill_bytes(&mut raw[..]);
    Zeroizing::new(URL_SAFE_NO_PAD.encode(&raw[..]))
}

/// Credentials generated for one application
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Application the credentials belong to
    pub app_name: String,
    /// Namespace the application runs in
    pub namespace: String,
    /// Admin username
    pub username: String,
    /// Admin password (zeroized on drop)
    #[serde(serialize_with = "expose")]
    pub password: Zeroizing<String>,
    /// When the record was generated
    pub created_at: DateTime<Utc>,
    /// Extra values such as OIDC client id, secret and issuer
    pub extra: BTreeMap<String, String>,
}

fn expose<S: Serializer>(password: &Zeroizing<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(password.as_str())
}

impl CredentialRecord {
    /// Fresh record with a newly generated password
    pub fn generate(app_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            namespace: namespace.into(),
            username: DEFAULT_USERNAME.to_string(),
            password: generate_password(),
            created_at: Utc::now(),
            extra: BTreeMap::new(),
        }
    }

    /// Env entries for the app's own credential secret, if it has a convention
    pub fn env_for_app(&self) -> Option<BTreeMap<String, String>> {
        let convention = env_convention(&self.app_name)?;
        let mut env = BTreeMap::new();
        env.insert(convention.user.to_string(), self.username.clone());
        env.insert(convention.password.to_string(), self.password.as_str().to_string());
        Some(env)
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extra_keys: Vec<&String> = self.extra.keys().collect();
        f.debug_struct("CredentialRecord")
            .field("app_name", &self.app_name)
            .field("namespace", &self.namespace)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("extra_keys", &extra_keys)
            .finish()
    }
}
