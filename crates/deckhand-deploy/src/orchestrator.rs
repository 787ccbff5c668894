//! The deploy pipeline
//!
//! A request is planned first: validated, classified and synthesized without
//! touching the cluster, so every input error surfaces before the first
//! upstream call. The plan is then applied in a fixed order. The namespace
//! and the workload itself are hard prerequisites; every later step is
//! best-effort and recorded in the [`DeployReport`].

use std::sync::Arc;

use deckhand_common::kube_utils::{is_cluster_scoped, kind_priority, manifest_metadata};
use deckhand_common::naming::validate_dns_label;
use deckhand_common::yaml::parse_yaml_documents;
use deckhand_common::{
    Error, DEPLOYED_BY_DECKHAND, DEPLOYED_BY_SELECTOR, LABEL_APP, LABEL_DEPLOYED_BY,
    LABEL_PROJECT,
};
use deckhand_source::{
    classify, resolve, translate, Classification, RepoIdentity, RouteCandidate, SourceFormat,
};
use deckhand_workload::k8s::Namespace;
use deckhand_workload::resource_set::to_value;
use deckhand_workload::synth::{claim_name, credentials_secret_name, object_storage_secret_name};
use deckhand_workload::{synthesize, ResourceSet, WorkloadSource};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::chart::ChartInstaller;
use crate::config::DeployerConfig;
use crate::control_plane::{object_ref, ControlPlane};
use crate::credentials::{needs_credentials, CredentialRecord};
use crate::identity::IdentityProvider;
use crate::integrations::{IntegrationConfig, Target};
use crate::report::{AppSummary, DeleteFailure, DeleteReport, DeployReport, Step, StepOutcome};
use crate::vault::CredentialVault;

/// Kinds that can carry the compose project label
const PROJECT_KINDS: &[&str] = &[
    "Deployment",
    "Service",
    "HTTPRoute",
    "PersistentVolumeClaim",
    "Secret",
    "DestinationRule",
    "PeerAuthentication",
    "AuthorizationPolicy",
];

/// What is being deployed
#[derive(Clone, Debug)]
pub enum DeploySource {
    /// Opaque text, classified on arrival
    Text {
        /// File content
        text: String,
        /// Filename the caller supplied
        filename: Option<String>,
        /// Repository the text was fetched from, used by the image resolver
        repo: Option<RepoIdentity>,
    },
    /// A pre-built image
    Image {
        /// Image reference
        image: String,
        /// Port the container listens on
        port: u16,
    },
    /// A chart reference (`repo/chart`, OCI URL or local directory)
    Chart {
        /// Chart reference
        reference: String,
        /// Values YAML; empty for none
        values: String,
    },
}

/// One deploy request
#[derive(Clone, Debug)]
pub struct DeployRequest {
    /// Application name (DNS-1123 label)
    pub name: String,
    /// Target namespace (DNS-1123 label)
    pub namespace: String,
    /// What to deploy
    pub source: DeploySource,
    /// Optional integrations
    pub integrations: IntegrationConfig,
}

/// Everything that will be declared, computed without cluster access
#[derive(Clone, Debug)]
pub enum DeployPlan {
    /// Objects from a native manifest, in apply order
    Manifests {
        /// Prepared objects
        objects: Vec<Value>,
    },
    /// A chart install
    Chart {
        /// Chart reference
        chart: String,
        /// Values YAML
        values: String,
    },
    /// Synthesized workloads
    Workloads {
        /// One set per service
        sets: Vec<ResourceSet>,
        /// Index of the set integrations attach to
        primary: usize,
        /// Compose project name
        project: Option<String>,
        /// Compose services with a web port
        routes: Vec<RouteCandidate>,
        /// Translation warnings
        warnings: Vec<String>,
    },
}

impl DeployPlan {
    /// Objects the workload step declares
    pub fn objects(&self) -> Result<Vec<Value>, Error> {
        match self {
            Self::Manifests { objects } => Ok(objects.clone()),
            Self::Chart { .. } => Ok(Vec::new()),
            Self::Workloads { sets, .. } => {
                let mut objects = Vec::new();
                for set in sets {
                    objects.extend(set.objects()?);
                }
                Ok(objects)
            }
        }
    }
}

/// Summary of a plan for dry runs
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    /// Detected format
    pub format: SourceFormat,
    /// Chart reference, for chart plans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    /// Objects the workload step would declare
    pub objects: Vec<Value>,
    /// Translation warnings
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Runs deploy, delete and lookup requests against the upstream systems
pub struct Orchestrator {
    pub(crate) control_plane: Arc<dyn ControlPlane>,
    pub(crate) charts: Arc<dyn ChartInstaller>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) vault: CredentialVault,
    pub(crate) config: DeployerConfig,
}

impl Orchestrator {
    /// Create an orchestrator; the vault shares the control plane
    pub fn new(
        config: DeployerConfig,
        control_plane: Arc<dyn ControlPlane>,
        charts: Arc<dyn ChartInstaller>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let vault = CredentialVault::new(control_plane.clone(), config.vault_namespace.clone());
        Self {
            control_plane,
            charts,
            identity,
            vault,
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Deploy `request` and apply its integrations
    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeployReport, Error> {
        let (format, plan) = plan(request)?;
        self.ensure_app_namespace(&request.namespace)?;
        let name = request.name.as_str();
        let namespace = request.namespace.as_str();
        info!(app = %name, namespace = %namespace, format = %format, "deploying");

        let mut report = DeployReport::new(name, namespace, format);

        let ns = Namespace::managed(namespace, self.config.mesh_enabled);
        self.control_plane.declare(&to_value(&ns)?).await?;
        report.record(Step::Namespace, StepOutcome::Succeeded);

        match &plan {
            DeployPlan::Manifests { objects } => self.declare_all(objects).await?,
            DeployPlan::Chart { chart, values } => {
                self.charts.install(name, chart, namespace, values).await?
            }
            DeployPlan::Workloads { sets, .. } => {
                for set in sets {
                    self.declare_all(&set.objects()?).await?;
                }
            }
        }
        report.record(Step::Workload, StepOutcome::Succeeded);
        info!(app = %name, namespace = %namespace, "workload declared");

        let empty: Vec<ResourceSet> = Vec::new();
        let target = match &plan {
            DeployPlan::Workloads {
                sets,
                primary,
                project,
                routes,
                warnings,
            } => {
                report.warnings.extend(warnings.iter().cloned());
                Target {
                    app: name,
                    namespace,
                    sets,
                    primary: *primary,
                    project: project.as_deref(),
                    routes,
                }
            }
            _ => Target {
                app: name,
                namespace,
                sets: &empty,
                primary: 0,
                project: None,
                routes: &[],
            },
        };

        let integrations = &request.integrations;
        let mut env_from = Vec::new();

        let storage = match &integrations.storage {
            Some(storage) => self.apply_storage(&target, storage).await,
            None => not_requested(),
        };
        report.record(Step::Storage, storage);

        let object_storage = if integrations.object_storage {
            self.apply_object_storage(&target, &mut env_from).await
        } else {
            not_requested()
        };
        report.record(Step::ObjectStorage, object_storage);

        let (exposure, hostname) = match &integrations.exposure {
            Some(exposure) => self.apply_exposure(&target, exposure).await,
            None => (not_requested(), None),
        };
        report.record(Step::Exposure, exposure);
        report.access_url = hostname.as_ref().map(|h| format!("https://{}", h));

        let mesh = self.apply_mesh(&target).await;
        report.record(Step::Mesh, mesh);

        let access = if integrations.access_control {
            self.apply_access_control(&target).await
        } else {
            not_requested()
        };
        report.record(Step::AccessControl, access);

        if integrations.generate_credentials || needs_credentials(name) {
            let hostname = hostname.unwrap_or_else(|| self.config.hostname_for(name));
            let (credentials, record) = self
                .apply_credentials(&target, &hostname, &mut env_from, &mut report.warnings)
                .await;
            report.record(Step::Credentials, credentials);
            self.persist(record, &mut report).await;
        } else {
            report.record(Step::Credentials, not_requested());
            report.record(Step::Vault, not_requested());
        }

        if report.success() {
            info!(app = %name, namespace = %namespace, "deployment complete");
        } else {
            warn!(app = %name, namespace = %namespace, failed = ?report.failed_steps(), "deployment complete with failed steps");
        }
        Ok(report)
    }

    /// Applications never share the vault namespace
    fn ensure_app_namespace(&self, namespace: &str) -> Result<(), Error> {
        if namespace == self.vault.namespace() {
            return Err(Error::input_for_field(
                "namespace",
                format!(
                    "namespace '{}' is reserved for credential records",
                    namespace
                ),
            ));
        }
        Ok(())
    }

    /// Store the record; only a stored record is returned to the caller
    async fn persist(&self, record: CredentialRecord, report: &mut DeployReport) {
        match self.vault.store(&record).await {
            Ok(()) => {
                report.record(Step::Vault, StepOutcome::Succeeded);
                report.credentials = Some(record);
            }
            Err(e) => {
                warn!(app = %record.app_name, error = %e, "failed to store credential record");
                report.record(Step::Vault, StepOutcome::failed(&e));
                report.warnings.push(
                    "generated credentials could not be stored and are not returned".to_string(),
                );
            }
        }
    }

    async fn declare_all(&self, objects: &[Value]) -> Result<(), Error> {
        for object in objects {
            self.control_plane.declare(object).await?;
            debug!(object = %object_ref(object), "declared");
        }
        Ok(())
    }

    /// Remove everything deployed under `name`; missing objects are not errors
    pub async fn delete(&self, name: &str, namespace: &str) -> Result<DeleteReport, Error> {
        validate_dns_label(name, "name")?;
        validate_dns_label(namespace, "namespace")?;
        self.ensure_app_namespace(namespace)?;
        info!(app = %name, namespace = %namespace, "deleting");

        let mut report = DeleteReport::default();
        let mut targets: Vec<(String, String)> = vec![
            ("Deployment".to_string(), name.to_string()),
            ("Service".to_string(), name.to_string()),
            ("HTTPRoute".to_string(), name.to_string()),
            ("PersistentVolumeClaim".to_string(), claim_name(name)),
            ("Secret".to_string(), object_storage_secret_name(name)),
            ("Secret".to_string(), credentials_secret_name(name)),
            ("DestinationRule".to_string(), name.to_string()),
            ("PeerAuthentication".to_string(), name.to_string()),
            ("AuthorizationPolicy".to_string(), format!("{}-authz", name)),
        ];

        let selector = format!("{}={}", LABEL_PROJECT, name);
        for kind in PROJECT_KINDS {
            match self.control_plane.list(kind, namespace, &selector).await {
                Ok(items) => {
                    for item in items {
                        let Some(member) = item.pointer("/metadata/name").and_then(Value::as_str)
                        else {
                            continue;
                        };
                        let entry = (kind.to_string(), member.to_string());
                        if !targets.contains(&entry) {
                            targets.push(entry);
                        }
                    }
                }
                Err(e) => report.failed.push(DeleteFailure {
                    object: format!("{} with {}", kind, selector),
                    error: e.to_string(),
                }),
            }
        }

        for (kind, object) in &targets {
            let reference = format!("{}/{}", kind, object);
            match self.control_plane.delete(kind, object, namespace).await {
                Ok(true) => report.deleted.push(reference),
                Ok(false) => report.missing.push(reference),
                Err(e) => {
                    warn!(object = %reference, error = %e, "delete failed");
                    report.failed.push(DeleteFailure {
                        object: reference,
                        error: e.to_string(),
                    });
                }
            }
        }

        let record = format!("CredentialRecord/{}", name);
        match self.vault.remove_owned(name, namespace).await {
            Ok(true) => report.deleted.push(record),
            Ok(false) => report.missing.push(record),
            Err(e) => report.failed.push(DeleteFailure {
                object: record,
                error: e.to_string(),
            }),
        }

        info!(
            app = %name,
            deleted = report.deleted.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "delete finished"
        );
        Ok(report)
    }

    /// Stored credentials for `app`
    pub async fn credentials(&self, app: &str) -> Result<CredentialRecord, Error> {
        validate_dns_label(app, "name")?;
        self.vault.get(app).await
    }

    /// Applications deployed in `namespace` (all namespaces when empty)
    pub async fn list_applications(&self, namespace: &str) -> Result<Vec<AppSummary>, Error> {
        if !namespace.is_empty() {
            validate_dns_label(namespace, "namespace")?;
        }
        let deployments = self
            .control_plane
            .list("Deployment", namespace, DEPLOYED_BY_SELECTOR)
            .await?;
        Ok(deployments.iter().filter_map(app_summary).collect())
    }
}

/// Validate and plan `request` without any upstream call
pub fn plan(request: &DeployRequest) -> Result<(SourceFormat, DeployPlan), Error> {
    validate_dns_label(&request.name, "name")?;
    validate_dns_label(&request.namespace, "namespace")?;
    let name = request.name.as_str();
    let namespace = request.namespace.as_str();

    match &request.source {
        DeploySource::Image { image, port } => {
            if image.trim().is_empty() {
                return Err(Error::input_for_field("image", "image must not be empty"));
            }
            if *port == 0 {
                return Err(Error::input_for_field("port", "port must be between 1 and 65535"));
            }
            let source = WorkloadSource::Image {
                image: image.as_str(),
                port: *port,
            };
            let set = synthesize(name, namespace, source);
            Ok((SourceFormat::DockerBuild, single(set)))
        }
        DeploySource::Chart { reference, values } => {
            if reference.trim().is_empty() {
                return Err(Error::input_for_field("chart", "chart reference must not be empty"));
            }
            Ok((
                SourceFormat::HelmChart,
                DeployPlan::Chart {
                    chart: reference.clone(),
                    values: values.clone(),
                },
            ))
        }
        DeploySource::Text {
            text,
            filename,
            repo,
        } => {
            let classification = classify(text, filename.as_deref());
            let format = classification.format();
            let plan = match classification {
                Classification::Manifest { .. } => DeployPlan::Manifests {
                    objects: prepare_manifests(text, name, namespace)?,
                },
                Classification::Compose { .. } => plan_compose(text, name, namespace)?,
                Classification::DockerBuild { .. } => {
                    let image = resolve(text, repo.as_ref()).into_image(name)?;
                    debug!(app = %name, image = %image.image, source = ?image.source, "resolved build recipe");
                    single(synthesize(name, namespace, WorkloadSource::Resolved(&image)))
                }
                Classification::HelmChart { chart } => DeployPlan::Chart {
                    chart,
                    values: String::new(),
                },
                Classification::Unknown => {
                    return Err(Error::input_for_field(
                        "content",
                        "unrecognized source format: expected a cluster manifest, compose file, \
                         build recipe or chart",
                    ))
                }
            };
            Ok((format, plan))
        }
    }
}

/// Plan without applying, for dry runs
pub fn dry_run(request: &DeployRequest) -> Result<PlanSummary, Error> {
    let (format, plan) = plan(request)?;
    let objects = plan.objects()?;
    let (chart, warnings) = match plan {
        DeployPlan::Chart { chart, .. } => (Some(chart), Vec::new()),
        DeployPlan::Workloads { warnings, .. } => (None, warnings),
        DeployPlan::Manifests { .. } => (None, Vec::new()),
    };
    Ok(PlanSummary {
        format,
        chart,
        objects,
        warnings,
    })
}

fn not_requested() -> StepOutcome {
    StepOutcome::skipped("not requested")
}

fn single(set: ResourceSet) -> DeployPlan {
    DeployPlan::Workloads {
        sets: vec![set],
        primary: 0,
        project: None,
        routes: Vec::new(),
        warnings: Vec::new(),
    }
}

fn plan_compose(text: &str, project: &str, namespace: &str) -> Result<DeployPlan, Error> {
    let translation = translate(text, project)?;
    if translation.services.is_empty() {
        return Err(Error::input_for_field(
            "services",
            format!(
                "no deployable service: every service lacks an image (skipped: {})",
                translation.skipped.join(", ")
            ),
        ));
    }

    let primary_name = translation
        .primary_route()
        .map(|c| c.service.as_str())
        .unwrap_or(translation.services[0].name.as_str());
    let primary = translation
        .services
        .iter()
        .position(|s| s.name == primary_name)
        .unwrap_or(0);

    let sets = translation
        .services
        .iter()
        .map(|spec| {
            synthesize(&spec.name, namespace, WorkloadSource::Service(spec)).with_project(project)
        })
        .collect();

    Ok(DeployPlan::Workloads {
        sets,
        primary,
        project: Some(project.to_string()),
        routes: translation.route_candidates,
        warnings: translation.warnings,
    })
}

/// Parse manifest documents, default their namespace and label them
fn prepare_manifests(text: &str, app: &str, namespace: &str) -> Result<Vec<Value>, Error> {
    let mut objects = Vec::new();
    for doc in parse_yaml_documents(text)? {
        if doc.get("kind").and_then(Value::as_str) == Some("List") {
            let items = doc.get("items").and_then(Value::as_array).cloned();
            objects.extend(items.unwrap_or_default());
        } else {
            objects.push(doc);
        }
    }
    if objects.is_empty() {
        return Err(Error::input_for_field("content", "manifest contains no objects"));
    }

    for object in &mut objects {
        let meta = manifest_metadata(object)?;
        let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) else {
            continue;
        };
        if meta.namespace.is_none() && !is_cluster_scoped(&meta.kind) {
            metadata.insert("namespace".to_string(), json!(namespace));
        }
        let labels = metadata.entry("labels").or_insert_with(|| json!({}));
        if let Some(labels) = labels.as_object_mut() {
            labels.entry(LABEL_APP).or_insert_with(|| json!(app));
            labels.insert(LABEL_DEPLOYED_BY.to_string(), json!(DEPLOYED_BY_DECKHAND));
        }
    }

    objects.sort_by_key(|o| kind_priority(o.get("kind").and_then(Value::as_str).unwrap_or_default()));
    Ok(objects)
}

fn app_summary(deployment: &Value) -> Option<AppSummary> {
    Some(AppSummary {
        name: deployment.pointer("/metadata/name")?.as_str()?.to_string(),
        namespace: deployment
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        replicas: deployment
            .pointer("/spec/replicas")
            .and_then(Value::as_i64)
            .unwrap_or(1),
        ready_replicas: deployment
            .pointer("/status/readyReplicas")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        created: deployment
            .pointer("/metadata/creationTimestamp")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::MockChartInstaller;
    use crate::control_plane::MockControlPlane;
    use crate::identity::{MockIdentityProvider, OidcClient};
    use crate::integrations::{ExposureRequest, ExposureTier};
    use std::sync::Mutex;
    use zeroize::Zeroizing;

    const COMPOSE: &str = r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "8080:80"
  worker:
    build: ./worker
"#;

    fn orchestrator_with(
        cp: MockControlPlane,
        charts: MockChartInstaller,
        identity: MockIdentityProvider,
    ) -> Orchestrator {
        Orchestrator::new(
            DeployerConfig::default(),
            Arc::new(cp),
            Arc::new(charts),
            Arc::new(identity),
        )
    }

    fn orchestrator(cp: MockControlPlane) -> Orchestrator {
        orchestrator_with(cp, MockChartInstaller::new(), MockIdentityProvider::new())
    }

    fn record_declares(cp: &mut MockControlPlane) -> Arc<Mutex<Vec<Value>>> {
        let declared = Arc::new(Mutex::new(Vec::new()));
        let seen = declared.clone();
        cp.expect_declare().returning(move |obj| {
            seen.lock().unwrap().push(obj.clone());
            Ok(())
        });
        declared
    }

    fn request(name: &str, source: DeploySource) -> DeployRequest {
        DeployRequest {
            name: name.to_string(),
            namespace: "default".to_string(),
            source,
            integrations: IntegrationConfig::default(),
        }
    }

    fn text(content: &str) -> DeploySource {
        DeploySource::Text {
            text: content.to_string(),
            filename: None,
            repo: None,
        }
    }

    fn image(image: &str, port: u16) -> DeploySource {
        DeploySource::Image {
            image: image.to_string(),
            port,
        }
    }

    fn kinds(objects: &[Value]) -> Vec<String> {
        objects
            .iter()
            .map(|o| o["kind"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    // =========================================================================
    // Story: Input errors stop a request before any upstream call
    // =========================================================================

    #[tokio::test]
    async fn uppercase_name_is_rejected_without_calls() {
        let orch = orchestrator(MockControlPlane::new());
        let err = orch
            .deploy(&request("MyApp", image("nginx", 80)))
            .await
            .unwrap_err();
        assert!(err.is_input());
        assert!(err.to_string().contains("invalid name format"));
    }

    #[tokio::test]
    async fn unrecognized_text_is_rejected_without_calls() {
        let orch = orchestrator(MockControlPlane::new());
        let err = orch
            .deploy(&request("web", text("just some notes\nnothing to deploy")))
            .await
            .unwrap_err();
        assert!(err.is_input());
        assert_eq!(err.field(), Some("content"));
    }

    #[tokio::test]
    async fn recipe_that_must_be_built_lists_alternatives() {
        let recipe = "FROM python:3.12-slim\nCOPY . /app\nRUN pip install -r requirements.txt\nCMD [\"python\", \"app.py\"]\n";
        let orch = orchestrator(MockControlPlane::new());
        let err = orch
            .deploy(&request("api", text(recipe)))
            .await
            .unwrap_err();
        assert!(err.is_input());
        assert!(err.to_string().contains("pre-built image"));
    }

    #[test]
    fn compose_with_only_build_services_is_rejected() {
        let compose = "services:\n  api:\n    build: .\n";
        let err = plan(&request("shop", text(compose))).unwrap_err();
        assert_eq!(err.field(), Some("services"));
    }

    // =========================================================================
    // Story: Planning turns each source into canonical objects
    // =========================================================================

    #[test]
    fn compose_plan_skips_build_only_services() {
        let (format, plan) = plan(&request("shop", text(COMPOSE))).unwrap();
        assert_eq!(format, SourceFormat::Compose);

        let DeployPlan::Workloads {
            sets,
            primary,
            warnings,
            ..
        } = &plan
        else {
            panic!("expected workloads, got {:?}", plan);
        };
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[*primary].name(), "web");
        assert!(warnings.iter().any(|w| w.contains("worker")));
        assert_eq!(plan.objects().unwrap().len(), 2);
    }

    #[test]
    fn manifests_get_namespace_and_labels() {
        let manifest = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: api
  labels:
    app: api-server
spec: {}
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: api-config
data:
  mode: prod
"#;
        let (format, plan) = plan(&request("api", text(manifest))).unwrap();
        assert_eq!(format, SourceFormat::Manifest);

        let objects = plan.objects().unwrap();
        assert_eq!(kinds(&objects), vec!["ConfigMap", "Deployment"]);
        assert_eq!(objects[0]["metadata"]["namespace"], "default");
        assert_eq!(objects[0]["metadata"]["labels"]["app"], "api");
        assert_eq!(objects[1]["metadata"]["labels"]["app"], "api-server");
        assert_eq!(objects[1]["metadata"]["labels"]["deployed-by"], "deckhand");
    }

    #[test]
    fn cluster_scoped_manifests_stay_unnamespaced() {
        let manifest = r#"
apiVersion: admissionregistration.k8s.io/v1
kind: ValidatingWebhookConfiguration
metadata:
  name: api-webhook
webhooks: []
---
apiVersion: apiregistration.k8s.io/v1
kind: APIService
metadata:
  name: v1beta1.metrics.example.com
spec: {}
"#;
        let (_, plan) = plan(&request("api", text(manifest))).unwrap();
        let objects = plan.objects().unwrap();
        assert_eq!(objects.len(), 2);
        for object in &objects {
            assert!(object["metadata"].get("namespace").is_none(), "{}", object["kind"]);
            assert_eq!(object["metadata"]["labels"]["deployed-by"], "deckhand");
        }
    }

    #[test]
    fn chart_metadata_plans_a_chart_install() {
        let chart = "apiVersion: v2\nname: grafana\nversion: 8.0.0\nappVersion: \"11.0.0\"\n";
        let (format, plan) = plan(&request("grafana", text(chart))).unwrap();
        assert_eq!(format, SourceFormat::HelmChart);
        assert!(matches!(plan, DeployPlan::Chart { ref chart, .. } if chart == "grafana"));
    }

    // =========================================================================
    // Story: Steps run in order and report individually
    // =========================================================================

    #[tokio::test]
    async fn exposed_image_gets_route_on_user_gateway() {
        let mut cp = MockControlPlane::new();
        let declared = record_declares(&mut cp);
        let orch = orchestrator(cp);

        let mut req = request("web", image("nginx:1.27", 8080));
        req.integrations.exposure = Some(ExposureRequest {
            tier: ExposureTier::User,
            hostname: None,
        });
        let report = orch.deploy(&req).await.unwrap();

        assert!(report.success());
        assert_eq!(report.access_url.as_deref(), Some("https://web.deckhand.local"));
        assert_eq!(report.outcome(Step::Exposure), Some(&StepOutcome::Succeeded));
        assert_eq!(report.outcome(Step::Mesh), Some(&StepOutcome::Succeeded));
        assert!(matches!(
            report.outcome(Step::Storage),
            Some(StepOutcome::Skipped { .. })
        ));
        assert!(report.credentials.is_none());

        let declared = declared.lock().unwrap();
        assert_eq!(
            kinds(&declared),
            vec![
                "Namespace",
                "Service",
                "Deployment",
                "HTTPRoute",
                "DestinationRule",
                "PeerAuthentication"
            ]
        );
        let route = &declared[3];
        assert_eq!(route["spec"]["parentRefs"][0]["name"], "user-gateway");
        assert_eq!(route["spec"]["hostnames"][0], "web.deckhand.local");
    }

    #[tokio::test]
    async fn internal_tier_is_reported_as_skipped() {
        let mut cp = MockControlPlane::new();
        record_declares(&mut cp);
        let orch = orchestrator(cp);

        let mut req = request("web", image("nginx", 80));
        req.integrations.exposure = Some(ExposureRequest {
            tier: ExposureTier::Internal,
            hostname: None,
        });
        let report = orch.deploy(&req).await.unwrap();
        assert!(matches!(
            report.outcome(Step::Exposure),
            Some(StepOutcome::Skipped { .. })
        ));
        assert!(report.access_url.is_none());
    }

    #[tokio::test]
    async fn namespace_failure_aborts_the_pipeline() {
        let mut cp = MockControlPlane::new();
        cp.expect_declare()
            .times(1)
            .returning(|_| Err(Error::upstream("declare Namespace/default", "forbidden")));
        let orch = orchestrator(cp);

        let err = orch
            .deploy(&request("web", image("nginx", 80)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn failed_integration_does_not_stop_later_steps() {
        let mut cp = MockControlPlane::new();
        record_declares(&mut cp);
        cp.expect_read_secret().returning(|_, _| Ok(None));
        let orch = orchestrator(cp);

        let mut req = request("web", image("nginx", 80));
        req.integrations.object_storage = true;
        req.integrations.access_control = true;
        let report = orch.deploy(&req).await.unwrap();

        assert!(!report.success());
        assert_eq!(report.failed_steps(), vec![Step::ObjectStorage]);
        assert_eq!(
            report.outcome(Step::AccessControl),
            Some(&StepOutcome::Succeeded)
        );
    }

    #[tokio::test]
    async fn chart_sources_go_to_the_installer() {
        let mut cp = MockControlPlane::new();
        record_declares(&mut cp);
        let mut charts = MockChartInstaller::new();
        charts
            .expect_install()
            .times(1)
            .returning(|release, chart, ns, values| {
                assert_eq!(release, "grafana");
                assert_eq!(chart, "grafana/grafana");
                assert_eq!(ns, "default");
                assert_eq!(values, "");
                Ok(())
            });
        let mut identity = MockIdentityProvider::new();
        identity.expect_register_client().returning(|_, _| Ok(None));
        let orch = orchestrator_with(cp, charts, identity);

        let source = DeploySource::Chart {
            reference: "grafana/grafana".to_string(),
            values: String::new(),
        };
        let report = orch.deploy(&request("grafana", source)).await.unwrap();
        assert_eq!(report.format, SourceFormat::HelmChart);
        assert_eq!(report.outcome(Step::Workload), Some(&StepOutcome::Succeeded));
        assert!(report.credentials.is_some());
        assert!(report.warnings.iter().any(|w| w.contains("password-only")));
    }

    // =========================================================================
    // Story: Credentials are stored before they are returned
    // =========================================================================

    #[tokio::test]
    async fn grafana_gets_admin_env_and_oidc_client() {
        let mut cp = MockControlPlane::new();
        let declared = record_declares(&mut cp);
        let patches = Arc::new(Mutex::new(Vec::new()));
        let seen = patches.clone();
        cp.expect_patch().returning(move |p| {
            seen.lock().unwrap().push(p.clone());
            Ok(())
        });
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_register_client()
            .times(1)
            .returning(|app, uris| {
                assert_eq!(uris[0], "https://grafana.deckhand.local/*");
                Ok(Some(OidcClient {
                    client_id: app.to_string(),
                    client_secret: Zeroizing::new("client-secret".to_string()),
                    issuer: "https://keycloak.deckhand.local/realms/deckhand".to_string(),
                }))
            });
        let orch = orchestrator_with(cp, MockChartInstaller::new(), identity);

        let report = orch
            .deploy(&request("grafana", image("grafana/grafana:11.0.0", 3000)))
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(report.outcome(Step::Vault), Some(&StepOutcome::Succeeded));
        let record = report.credentials.as_ref().unwrap();
        assert_eq!(record.extra["oidcClientId"], "grafana");
        assert_eq!(record.extra["oidcClientSecret"], "client-secret");

        let declared = declared.lock().unwrap();
        let vault_secret = declared
            .iter()
            .find(|o| o["metadata"]["namespace"] == "deckhand-credentials" && o["kind"] == "Secret")
            .unwrap();
        assert_eq!(vault_secret["stringData"]["password"], record.password.as_str());

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        let container = &patches[0].body["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["envFrom"][0]["secretRef"]["name"], "grafana-credentials");
    }

    #[tokio::test]
    async fn unstored_credentials_are_not_returned() {
        let mut cp = MockControlPlane::new();
        cp.expect_declare().returning(|obj| {
            if obj["metadata"]["namespace"] == "deckhand-credentials" {
                Err(Error::upstream("declare Secret/api-credentials", "vault unavailable"))
            } else {
                Ok(())
            }
        });
        let orch = orchestrator(cp);

        let mut req = request("api", image("nginx", 80));
        req.integrations.generate_credentials = true;
        let report = orch.deploy(&req).await.unwrap();

        assert_eq!(report.failed_steps(), vec![Step::Vault]);
        assert!(report.credentials.is_none());
    }

    // =========================================================================
    // Story: Delete removes the app, its companions and its compose siblings
    // =========================================================================

    #[tokio::test]
    async fn delete_follows_naming_and_project_label() {
        let mut cp = MockControlPlane::new();
        cp.expect_list().returning(|kind, ns, selector| {
            assert_eq!(ns, "default");
            assert_eq!(selector, "deckhand.io/project=shop");
            if kind == "Deployment" {
                Ok(vec![json!({"metadata": {"name": "web"}})])
            } else {
                Ok(vec![])
            }
        });
        cp.expect_delete().returning(|kind, name, _| {
            Ok(matches!((kind, name), ("Deployment", "shop") | ("Deployment", "web")))
        });
        cp.expect_read_secret().returning(|_, _| Ok(None));
        let orch = orchestrator(cp);

        let report = orch.delete("shop", "default").await.unwrap();
        assert!(report.success());
        assert!(report.deleted.contains(&"Deployment/shop".to_string()));
        assert!(report.deleted.contains(&"Deployment/web".to_string()));
        assert!(report.missing.contains(&"PersistentVolumeClaim/shop-data".to_string()));
        assert!(report.missing.contains(&"AuthorizationPolicy/shop-authz".to_string()));
        assert!(report.missing.contains(&"CredentialRecord/shop".to_string()));
    }

    #[tokio::test]
    async fn vault_namespace_is_not_an_app_namespace() {
        let orch = orchestrator(MockControlPlane::new());
        let mut req = request("grafana", image("grafana/grafana:10.4.0", 3000));
        req.namespace = "deckhand-credentials".to_string();

        let err = orch.deploy(&req).await.unwrap_err();
        assert!(err.is_input());
        assert_eq!(err.field(), Some("namespace"));

        let err = orch
            .delete("grafana", "deckhand-credentials")
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("namespace"));
    }

    #[tokio::test]
    async fn list_summarizes_deployments() {
        let mut cp = MockControlPlane::new();
        cp.expect_list().returning(|kind, ns, selector| {
            assert_eq!(kind, "Deployment");
            assert_eq!(ns, "");
            assert_eq!(selector, DEPLOYED_BY_SELECTOR);
            Ok(vec![json!({
                "metadata": {"name": "web", "namespace": "default", "creationTimestamp": "2026-01-01T00:00:00Z"},
                "spec": {"replicas": 2},
                "status": {"readyReplicas": 1}
            })])
        });
        let orch = orchestrator(cp);

        let apps = orch.list_applications("").await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "web");
        assert_eq!(apps[0].replicas, 2);
        assert_eq!(apps[0].ready_replicas, 1);
    }
}
