//! Credential vault
//!
//! Records are Secrets named `<app>-credentials` in a namespace of their own,
//! apart from the application namespaces. Reads decode the whole record or
//! fail naming it; a half-read record is never returned.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use deckhand_common::kube_utils::ObjectMeta;
use deckhand_common::Error;
use deckhand_workload::k8s::{Namespace, Secret};
use deckhand_workload::resource_set::to_value;
use deckhand_workload::synth::credentials_secret_name;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::control_plane::ControlPlane;
use crate::credentials::CredentialRecord;

const KEY_APP_NAME: &str = "appName";
const KEY_NAMESPACE: &str = "namespace";
const KEY_USERNAME: &str = "username";
const KEY_PASSWORD: &str = "password";
const KEY_CREATED_AT: &str = "createdAt";
const EXTRA_PREFIX: &str = "extra.";

/// Kind reported when a record does not exist
const RECORD_KIND: &str = "credential record";

/// Stores and retrieves [`CredentialRecord`]s
#[derive(Clone)]
pub struct CredentialVault {
    control_plane: Arc<dyn ControlPlane>,
    namespace: String,
}

impl CredentialVault {
    /// Vault keeping its records in `namespace`
    pub fn new(control_plane: Arc<dyn ControlPlane>, namespace: impl Into<String>) -> Self {
        Self {
            control_plane,
            namespace: namespace.into(),
        }
    }

    /// Namespace records live in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store `record`, replacing any earlier record for the same app
    pub async fn store(&self, record: &CredentialRecord) -> Result<(), Error> {
        self.control_plane
            .declare(&to_value(&Namespace::managed(&self.namespace, false))?)
            .await?;

        let secret = encode(record, &self.namespace);
        self.control_plane.declare(&to_value(&secret)?).await?;
        info!(app = %record.app_name, vault = %self.namespace, "stored credential record");
        Ok(())
    }

    /// Fetch the record for `app_name`
    pub async fn get(&self, app_name: &str) -> Result<CredentialRecord, Error> {
        let name = credentials_secret_name(app_name);
        let data = self
            .control_plane
            .read_secret(&self.namespace, &name)
            .await?
            .ok_or_else(|| Error::not_found(RECORD_KIND, app_name))?;
        debug!(app = %app_name, "read credential record");
        decode(&name, data)
    }

    /// Delete the record for `app_name`; returns false if there was none
    pub async fn remove(&self, app_name: &str) -> Result<bool, Error> {
        self.control_plane
            .delete("Secret", &credentials_secret_name(app_name), &self.namespace)
            .await
    }

    /// Delete the record for `app_name` only if it was deployed to `namespace`
    ///
    /// A same-named app in another namespace keeps its record. Unreadable
    /// records cannot be attributed and are removed.
    pub async fn remove_owned(&self, app_name: &str, namespace: &str) -> Result<bool, Error> {
        match self.get(app_name).await {
            Ok(record) if record.namespace != namespace => {
                debug!(
                    app = %app_name,
                    owner = %record.namespace,
                    namespace = %namespace,
                    "credential record belongs to another namespace, keeping it"
                );
                Ok(false)
            }
            Ok(_) | Err(Error::CredentialDecode { .. }) => self.remove(app_name).await,
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn encode(record: &CredentialRecord, vault_namespace: &str) -> Secret {
    let meta = ObjectMeta::for_app(
        credentials_secret_name(&record.app_name),
        vault_namespace,
        &record.app_name,
    );
    let secret = Secret::new(meta)
        .with_data(KEY_APP_NAME, &record.app_name)
        .with_data(KEY_NAMESPACE, &record.namespace)
        .with_data(KEY_USERNAME, &record.username)
        .with_data(KEY_PASSWORD, record.password.as_str())
        .with_data(KEY_CREATED_AT, record.created_at.to_rfc3339());
    record.extra.iter().fold(secret, |secret, (k, v)| {
        secret.with_data(format!("{}{}", EXTRA_PREFIX, k), v)
    })
}

fn decode(record: &str, mut data: BTreeMap<String, String>) -> Result<CredentialRecord, Error> {
    let mut take = |key: &str| {
        data.remove(key)
            .ok_or_else(|| Error::credential_decode(record, format!("missing key '{}'", key)))
    };

    let app_name = take(KEY_APP_NAME)?;
    let namespace = take(KEY_NAMESPACE)?;
    let username = take(KEY_USERNAME)?;
    let password = Zeroizing::new(take(KEY_PASSWORD)?);
    let created_at = take(KEY_CREATED_AT)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            Error::credential_decode(record, format!("invalid '{}': {}", KEY_CREATED_AT, e))
        })?
        .with_timezone(&Utc);

    let extra = data
        .into_iter()
        .filter_map(|(k, v)| k.strip_prefix(EXTRA_PREFIX).map(|k| (k.to_string(), v)))
        .collect();

    Ok(CredentialRecord {
        app_name,
        namespace,
        username,
        password,
        created_at,
        extra,
    })
}
