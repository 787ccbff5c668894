//! Optional integrations layered on top of a declared workload
//!
//! Each step is independent and best-effort: it returns a [`StepOutcome`]
//! instead of an error, so one failing downstream system never hides what
//! the others did.

use std::collections::BTreeMap;
use std::str::FromStr;

use deckhand_common::{Error, LABEL_PROJECT};
use deckhand_source::RouteCandidate;
use deckhand_workload::resource_set::to_value;
use deckhand_workload::route::ParentRef;
use deckhand_workload::synth::{
    access_policy, app_secret, credentials_secret_name, env_from_patch, mesh_policies,
    object_storage_secret_name, route, storage_claim, storage_mount_patch,
};
use deckhand_workload::ResourceSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::credentials::{is_oidc_capable, CredentialRecord};
use crate::identity::redirect_uris;
use crate::orchestrator::Orchestrator;
use crate::report::StepOutcome;

/// Fallback service port for routes when a service declares none
const DEFAULT_ROUTE_PORT: u16 = 80;

/// Which optional integrations to apply; anything absent is skipped
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntegrationConfig {
    /// Persistent storage
    pub storage: Option<StorageRequest>,
    /// Scoped object-storage credentials
    pub object_storage: bool,
    /// External route
    pub exposure: Option<ExposureRequest>,
    /// External authorization policy
    pub access_control: bool,
    /// Generate credentials even for apps not known to need them
    pub generate_credentials: bool,
}

/// Persistent storage request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageRequest {
    /// Claim size (deployer default when absent)
    pub size: Option<String>,
    /// Mount path (deployer default when absent)
    pub mount_path: Option<String>,
}

/// Exposure request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposureRequest {
    /// Who may reach the app
    pub tier: ExposureTier,
    /// Hostname (defaults to `<name>.<domain>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Network exposure tier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureTier {
    /// End users, behind the identity-protected gateway
    User,
    /// Administrators, on the restricted gateway without an identity check
    Admin,
    /// Cluster-internal only; no route
    Internal,
}

impl FromStr for ExposureTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "internal" => Ok(Self::Internal),
            other => Err(Error::input_for_field(
                "exposure.tier",
                format!("unknown exposure tier '{}': expected user, admin or internal", other),
            )),
        }
    }
}

/// What the integration steps attach to
pub(crate) struct Target<'a> {
    /// Requested application name
    pub app: &'a str,
    /// Target namespace
    pub namespace: &'a str,
    /// Synthesized workloads; empty for manifests and charts
    pub sets: &'a [ResourceSet],
    /// Index of the set that owns storage, secrets and the main route
    pub primary: usize,
    /// Compose project name, labelled on everything we add
    pub project: Option<&'a str>,
    /// Compose services with a web port
    pub routes: &'a [RouteCandidate],
}

impl Target<'_> {
    pub fn primary(&self) -> Option<&ResourceSet> {
        self.sets.get(self.primary)
    }

    /// Apps that get per-app policies
    fn policy_apps(&self) -> Vec<&str> {
        if self.sets.is_empty() {
            vec![self.app]
        } else {
            self.sets.iter().map(|s| s.name()).collect()
        }
    }

    /// Add the project label, if any
    fn labelled(&self, mut object: Value) -> Value {
        if let Some(project) = self.project {
            if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
                let labels = metadata.entry("labels").or_insert_with(|| json!({}));
                if let Some(labels) = labels.as_object_mut() {
                    labels.insert(LABEL_PROJECT.to_string(), json!(project));
                }
            }
        }
        object
    }
}

fn outcome(step: &str, app: &str, result: Result<(), Error>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Succeeded,
        Err(e) => {
            warn!(app = %app, step = %step, error = %e, "integration step failed");
            StepOutcome::failed(e)
        }
    }
}

fn no_workload() -> StepOutcome {
    StepOutcome::skipped("no synthesized workload to attach to")
}

impl Orchestrator {
    /// PVC `<app>-data`, then the mount patch once the workload exists
    pub(crate) async fn apply_storage(&self, target: &Target<'_>, request: &StorageRequest) -> StepOutcome {
        let Some(set) = target.primary() else {
            return no_workload();
        };
        let size = request
            .size
            .as_deref()
            .unwrap_or(&self.config.default_storage_size);
        let mount_path = request
            .mount_path
            .as_deref()
            .unwrap_or(&self.config.default_mount_path);

        let result = async {
            let claim = storage_claim(
                set.name(),
                target.namespace,
                size,
                self.config.storage_class.as_deref(),
            );
            self.control_plane
                .declare(&target.labelled(to_value(&claim)?))
                .await?;
            self.control_plane
                .patch(&storage_mount_patch(set.name(), target.namespace, mount_path))
                .await
        }
        .await;

        if result.is_ok() {
            info!(app = %set.name(), size = %size, mount_path = %mount_path, "storage attached");
        }
        outcome("storage", target.app, result)
    }

    /// `<app>-objectstorage` secret from the shared root credentials
    pub(crate) async fn apply_object_storage(
        &self,
        target: &Target<'_>,
        env_from: &mut Vec<String>,
    ) -> StepOutcome {
        let Some(set) = target.primary() else {
            return no_workload();
        };
        let source = &self.config.object_storage;
        let secret_name = object_storage_secret_name(set.name());

        let result = async {
            let root = self
                .control_plane
                .read_secret(&source.namespace, &source.secret)
                .await?
                .ok_or_else(|| {
                    Error::upstream(
                        "read object storage credentials",
                        format!("secret {}/{} not found", source.namespace, source.secret),
                    )
                })?;
            let field = |key: &str| {
                root.get(key).cloned().ok_or_else(|| {
                    Error::upstream(
                        "read object storage credentials",
                        format!("secret {}/{} has no key '{}'", source.namespace, source.secret, key),
                    )
                })
            };

            let mut data = BTreeMap::new();
            data.insert("AWS_ACCESS_KEY_ID".to_string(), field(&source.access_key_field)?);
            data.insert("AWS_SECRET_ACCESS_KEY".to_string(), field(&source.secret_key_field)?);
            data.insert("AWS_ENDPOINT_URL".to_string(), source.endpoint.clone());
            data.insert("S3_ENDPOINT".to_string(), source.endpoint.clone());

            let secret = app_secret(set.name(), target.namespace, &secret_name, &data);
            self.control_plane
                .declare(&target.labelled(to_value(&secret)?))
                .await?;

            let mut wanted = env_from.clone();
            if !wanted.contains(&secret_name) {
                wanted.push(secret_name.clone());
            }
            self.control_plane
                .patch(&env_from_patch(set.name(), target.namespace, &wanted))
                .await?;
            *env_from = wanted;
            Ok::<(), Error>(())
        }
        .await;

        outcome("objectStorage", target.app, result)
    }

    /// HTTPRoutes on the tier's gateway; returns the primary hostname
    pub(crate) async fn apply_exposure(
        &self,
        target: &Target<'_>,
        request: &ExposureRequest,
    ) -> (StepOutcome, Option<String>) {
        let gateway_name = match request.tier {
            ExposureTier::User => &self.config.gateways.user,
            ExposureTier::Admin => &self.config.gateways.admin,
            ExposureTier::Internal => {
                return (StepOutcome::skipped("internal tier has no external route"), None)
            }
        };
        let Some(set) = target.primary() else {
            return (no_workload(), None);
        };

        let gateway = ParentRef::gateway(gateway_name, &self.config.gateways.namespace);
        let hostname = request
            .hostname
            .clone()
            .unwrap_or_else(|| self.config.hostname_for(target.app));

        let primary_port = target
            .routes
            .iter()
            .find(|c| c.primary)
            .map(|c| c.port)
            .or_else(|| set.service.primary_port())
            .unwrap_or(DEFAULT_ROUTE_PORT);

        let mut routes = vec![route(
            target.app,
            set.name(),
            target.namespace,
            gateway.clone(),
            &hostname,
            primary_port,
        )];
        if let Some(project) = target.project {
            for candidate in target.routes.iter().filter(|c| !c.primary) {
                // `<service>-<project>`, never the primary route's name
                let label = format!("{}-{}", candidate.service, project);
                let host = self.config.hostname_for(&label);
                routes.push(route(
                    &label,
                    &candidate.service,
                    target.namespace,
                    gateway.clone(),
                    &host,
                    candidate.port,
                ));
            }
        }

        let result = async {
            for r in &routes {
                self.control_plane
                    .declare(&target.labelled(to_value(r)?))
                    .await?;
                debug!(route = %r.metadata.name, hostname = ?r.hostname(), "declared route");
            }
            Ok::<(), Error>(())
        }
        .await;

        let step = outcome("exposure", target.app, result);
        let hostname = matches!(step, StepOutcome::Succeeded).then_some(hostname);
        (step, hostname)
    }

    /// DestinationRule and PeerAuthentication per app
    pub(crate) async fn apply_mesh(&self, target: &Target<'_>) -> StepOutcome {
        if !self.config.mesh_enabled {
            return StepOutcome::skipped("mesh disabled");
        }
        let result = async {
            for app in target.policy_apps() {
                let policies = mesh_policies(app, target.namespace);
                self.control_plane
                    .declare(&target.labelled(to_value(&policies.destination_rule)?))
                    .await?;
                self.control_plane
                    .declare(&target.labelled(to_value(&policies.peer_authentication)?))
                    .await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        outcome("mesh", target.app, result)
    }

    /// `<app>-authz` per app, delegating to the configured provider
    pub(crate) async fn apply_access_control(&self, target: &Target<'_>) -> StepOutcome {
        let result = async {
            for app in target.policy_apps() {
                let policy = access_policy(app, target.namespace, &self.config.auth_provider);
                self.control_plane
                    .declare(&target.labelled(to_value(&policy)?))
                    .await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        outcome("accessControl", target.app, result)
    }

    /// Generate the record, register an OIDC client, hand the app its env.
    ///
    /// The record is returned even when env injection fails so it can still
    /// be persisted.
    pub(crate) async fn apply_credentials(
        &self,
        target: &Target<'_>,
        hostname: &str,
        env_from: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> (StepOutcome, CredentialRecord) {
        let mut record = CredentialRecord::generate(target.app, target.namespace);

        if is_oidc_capable(target.app) {
            match self
                .identity
                .register_client(target.app, &redirect_uris(hostname))
                .await
            {
                Ok(Some(client)) => {
                    record.extra.insert("oidcClientId".to_string(), client.client_id.clone());
                    record
                        .extra
                        .insert("oidcClientSecret".to_string(), client.client_secret.as_str().to_string());
                    record.extra.insert("oidcIssuer".to_string(), client.issuer.clone());
                }
                Ok(None) => warnings.push(format!(
                    "identity provider unavailable; {} credentials are password-only",
                    target.app
                )),
                Err(e) => {
                    warn!(app = %target.app, error = %e, "OIDC client registration failed");
                    warnings.push(format!("OIDC client registration failed: {}", e));
                }
            }
        }

        let (Some(env), Some(set)) = (record.env_for_app(), target.primary()) else {
            return (StepOutcome::Succeeded, record);
        };

        let secret_name = credentials_secret_name(set.name());
        let result = async {
            let secret = app_secret(set.name(), target.namespace, &secret_name, &env);
            self.control_plane
                .declare(&target.labelled(to_value(&secret)?))
                .await?;

            let mut wanted = env_from.clone();
            if !wanted.contains(&secret_name) {
                wanted.push(secret_name.clone());
            }
            self.control_plane
                .patch(&env_from_patch(set.name(), target.namespace, &wanted))
                .await?;
            *env_from = wanted;
            Ok::<(), Error>(())
        }
        .await;

        (outcome("credentials", target.app, result), record)
    }
}
