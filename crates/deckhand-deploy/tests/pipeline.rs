//! End-to-end pipeline scenarios against an in-memory control plane

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deckhand_common::Error;
use deckhand_deploy::{
    ChartInstaller, ControlPlane, DeployRequest, DeploySource, DeployerConfig, ExposureRequest,
    ExposureTier, IntegrationConfig, NoIdentityProvider, Orchestrator, Step, StepOutcome,
    StorageRequest,
};
use deckhand_workload::ObjectPatch;
use serde_json::Value;

// =============================================================================
// Recording control plane
// =============================================================================

type Key = (String, String, String);

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<Key, Value>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    calls: Vec<String>,
}

/// Keeps declared objects by kind/namespace/name and logs every call.
///
/// Patches against objects that do not exist fail like the API server would.
#[derive(Clone, Default)]
struct RecordingControlPlane {
    state: Arc<Mutex<ClusterState>>,
}

impl RecordingControlPlane {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(k, _, _)| k == kind)
            .count()
    }

    fn get(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }
}

fn key_of(object: &Value) -> Key {
    let field = |pointer: &str| {
        object
            .pointer(pointer)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    (field("/kind"), field("/metadata/namespace"), field("/metadata/name"))
}

#[async_trait]
impl ControlPlane for RecordingControlPlane {
    async fn declare(&self, object: &Value) -> Result<(), Error> {
        let key = key_of(object);
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("declare {}/{}", key.0, key.2));
        state.objects.insert(key, object.clone());
        Ok(())
    }

    async fn patch(&self, patch: &ObjectPatch) -> Result<(), Error> {
        let key = (
            patch.kind.clone(),
            patch.namespace.clone(),
            patch.name.clone(),
        );
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(format!("patch {}/{}", patch.kind, patch.name));
        if !state.objects.contains_key(&key) {
            return Err(Error::upstream(
                format!("patch {}/{}", patch.kind, patch.name),
                "not found",
            ));
        }
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<bool, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete {}/{}", kind, name));
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        Ok(state.objects.remove(&key).is_some())
    }

    async fn list(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<Value>, Error> {
        let (label, value) = selector.split_once('=').unwrap_or((selector, ""));
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && (namespace.is_empty() || ns == namespace))
            .filter(|(_, o)| {
                selector.is_empty() || o["metadata"]["labels"][label].as_str() == Some(value)
            })
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let state = self.state.lock().unwrap();
        if let Some(data) = state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
        {
            return Ok(Some(data.clone()));
        }
        let declared = state
            .objects
            .get(&("Secret".to_string(), namespace.to_string(), name.to_string()))
            .and_then(|s| serde_json::from_value(s["stringData"].clone()).ok());
        Ok(declared)
    }
}

struct NoCharts;

#[async_trait]
impl ChartInstaller for NoCharts {
    async fn install(&self, release: &str, _: &str, _: &str, _: &str) -> Result<(), Error> {
        Err(Error::upstream(format!("helm install {}", release), "no charts here"))
    }
}

fn orchestrator(cp: &RecordingControlPlane) -> Orchestrator {
    Orchestrator::new(
        DeployerConfig::default(),
        Arc::new(cp.clone()),
        Arc::new(NoCharts),
        Arc::new(NoIdentityProvider),
    )
}

fn compose_request(name: &str, compose: &str) -> DeployRequest {
    DeployRequest {
        name: name.to_string(),
        namespace: "default".to_string(),
        source: DeploySource::Text {
            text: compose.to_string(),
            filename: Some("docker-compose.yml".to_string()),
            repo: None,
        },
        integrations: IntegrationConfig::default(),
    }
}

const WEB_COMPOSE: &str = r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "8080:80"
"#;

// =============================================================================
// Story: A compose service becomes one Deployment and one Service
// =============================================================================

#[tokio::test]
async fn compose_web_service_maps_ports_and_labels() {
    let cp = RecordingControlPlane::default();
    let report = orchestrator(&cp)
        .deploy(&compose_request("web", WEB_COMPOSE))
        .await
        .unwrap();
    assert!(report.success());

    let deployment = cp.get("Deployment", "default", "web").unwrap();
    let container = &deployment["spec"]["template"]["spec"]["containers"][0];
    assert_eq!(container["image"], "nginx:1.27");
    assert_eq!(container["ports"][0]["containerPort"], 80);
    assert_eq!(deployment["metadata"]["labels"]["app"], "web");
    assert_eq!(deployment["metadata"]["labels"]["deployed-by"], "deckhand");

    let service = cp.get("Service", "default", "web").unwrap();
    assert_eq!(service["spec"]["ports"][0]["port"], 8080);
    assert_eq!(service["spec"]["ports"][0]["targetPort"], 80);
    assert_eq!(service["metadata"]["labels"]["app"], "web");
}

#[tokio::test]
async fn resources_are_two_per_translatable_service() {
    let compose = r#"
services:
  web:
    image: nginx:1.27
    ports: ["80"]
  cache:
    image: redis:7
  api:
    build: ./api
"#;
    let cp = RecordingControlPlane::default();
    let report = orchestrator(&cp)
        .deploy(&compose_request("shop", compose))
        .await
        .unwrap();

    assert_eq!(cp.count("Deployment"), 2);
    assert_eq!(cp.count("Service"), 2);
    assert!(cp.get("Deployment", "default", "api").is_none());
    assert!(report.warnings.iter().any(|w| w.contains("api")));
}

// =============================================================================
// Story: Bad names never reach the cluster
// =============================================================================

#[tokio::test]
async fn uppercase_name_is_rejected_before_any_call() {
    let cp = RecordingControlPlane::default();
    let err = orchestrator(&cp)
        .deploy(&compose_request("MyApp", WEB_COMPOSE))
        .await
        .unwrap_err();
    assert!(err.is_input());
    assert!(cp.calls().is_empty());
}

// =============================================================================
// Story: Storage is claimed, then mounted once the workload exists
// =============================================================================

#[tokio::test]
async fn storage_claim_then_patch_after_workload() {
    let cp = RecordingControlPlane::default();
    let mut request = compose_request("web", WEB_COMPOSE);
    request.integrations.storage = Some(StorageRequest {
        size: Some("5Gi".to_string()),
        mount_path: None,
    });

    let report = orchestrator(&cp).deploy(&request).await.unwrap();
    assert_eq!(report.outcome(Step::Storage), Some(&StepOutcome::Succeeded));

    let claim = cp
        .get("PersistentVolumeClaim", "default", "web-data")
        .unwrap();
    assert_eq!(claim["spec"]["resources"]["requests"]["storage"], "5Gi");

    let calls = cp.calls();
    let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
    assert!(position("declare Deployment/web") < position("declare PersistentVolumeClaim/web-data"));
    assert!(position("declare PersistentVolumeClaim/web-data") < position("patch Deployment/web"));
}

// =============================================================================
// Story: Submitting twice converges
// =============================================================================

#[tokio::test]
async fn repeated_deploys_converge() {
    let cp = RecordingControlPlane::default();
    let orch = orchestrator(&cp);
    let request = compose_request("web", WEB_COMPOSE);

    orch.deploy(&request).await.unwrap();
    let first = cp.get("Deployment", "default", "web").unwrap();
    orch.deploy(&request).await.unwrap();

    assert_eq!(cp.count("Deployment"), 1);
    assert_eq!(cp.count("Service"), 1);
    assert_eq!(cp.get("Deployment", "default", "web").unwrap(), first);
}

// =============================================================================
// Story: Object storage credentials come from the shared root secret
// =============================================================================

#[tokio::test]
async fn object_storage_secret_is_minted_from_root_credentials() {
    let cp = RecordingControlPlane::default();
    {
        let mut root = BTreeMap::new();
        root.insert("rootUser".to_string(), "minio".to_string());
        root.insert("rootPassword".to_string(), "minio-secret".to_string());
        cp.state
            .lock()
            .unwrap()
            .secrets
            .insert(("minio".to_string(), "minio-credentials".to_string()), root);
    }
    let mut request = compose_request("web", WEB_COMPOSE);
    request.integrations.object_storage = true;

    let report = orchestrator(&cp).deploy(&request).await.unwrap();
    assert_eq!(
        report.outcome(Step::ObjectStorage),
        Some(&StepOutcome::Succeeded)
    );
    let secret = cp.get("Secret", "default", "web-objectstorage").unwrap();
    assert_eq!(secret["stringData"]["AWS_ACCESS_KEY_ID"], "minio");
    assert!(cp.calls().contains(&"patch Deployment/web".to_string()));
}

// =============================================================================
// Story: Credentials round-trip through the vault; delete cleans up
// =============================================================================

#[tokio::test]
async fn generated_credentials_are_retrievable_then_deleted() {
    let cp = RecordingControlPlane::default();
    let orch = orchestrator(&cp);
    let mut request = compose_request("web", WEB_COMPOSE);
    request.integrations.generate_credentials = true;

    let report = orch.deploy(&request).await.unwrap();
    let generated = report.credentials.expect("credentials returned");

    let stored = orch.credentials("web").await.unwrap();
    assert_eq!(*stored.password, *generated.password);
    assert_eq!(stored.namespace, "default");

    let deleted = orch.delete("web", "default").await.unwrap();
    assert!(deleted.success());
    assert!(deleted.deleted.contains(&"Deployment/web".to_string()));
    assert!(deleted.deleted.contains(&"CredentialRecord/web".to_string()));
    assert!(cp.get("Deployment", "default", "web").is_none());

    let err = orch.credentials("web").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn delete_in_another_namespace_keeps_the_record() {
    let cp = RecordingControlPlane::default();
    let orch = orchestrator(&cp);
    let mut request = compose_request("web", WEB_COMPOSE);
    request.integrations.generate_credentials = true;
    orch.deploy(&request).await.unwrap();

    let report = orch.delete("web", "staging").await.unwrap();
    assert!(!report.deleted.contains(&"CredentialRecord/web".to_string()));

    let stored = orch.credentials("web").await.unwrap();
    assert_eq!(stored.namespace, "default");
}

// =============================================================================
// Story: The vault namespace never hosts applications
// =============================================================================

const GRAFANA_COMPOSE: &str = r#"
services:
  grafana:
    image: grafana/grafana:10.4.0
    ports:
      - "3000:3000"
"#;

#[tokio::test]
async fn deploy_into_vault_namespace_is_rejected() {
    let cp = RecordingControlPlane::default();
    let mut request = compose_request("grafana", GRAFANA_COMPOSE);
    request.namespace = "deckhand-credentials".to_string();

    let err = orchestrator(&cp).deploy(&request).await.unwrap_err();
    assert!(err.is_input());
    assert_eq!(err.field(), Some("namespace"));
    assert!(cp.calls().is_empty());
}

#[tokio::test]
async fn delete_from_vault_namespace_leaves_records_alone() {
    let cp = RecordingControlPlane::default();
    let orch = orchestrator(&cp);
    orch.deploy(&compose_request("grafana", GRAFANA_COMPOSE))
        .await
        .unwrap();
    assert!(cp
        .get("Secret", "deckhand-credentials", "grafana-credentials")
        .is_some());

    let before = cp.calls().len();
    let err = orch
        .delete("grafana", "deckhand-credentials")
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("namespace"));
    assert_eq!(cp.calls().len(), before);
    assert!(orch.credentials("grafana").await.is_ok());
}

// =============================================================================
// Story: Every exposed compose service keeps its own route
// =============================================================================

#[tokio::test]
async fn service_named_after_project_does_not_replace_primary_route() {
    let compose = r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "80:80"
  shop:
    image: ghcr.io/acme/shop:1.0
    ports:
      - "3000:3000"
"#;
    let cp = RecordingControlPlane::default();
    let mut request = compose_request("shop", compose);
    request.integrations.exposure = Some(ExposureRequest {
        tier: ExposureTier::User,
        hostname: None,
    });

    let report = orchestrator(&cp).deploy(&request).await.unwrap();
    assert!(report.success());
    assert_eq!(report.access_url.as_deref(), Some("https://shop.deckhand.local"));
    assert_eq!(cp.count("HTTPRoute"), 2);

    let primary = cp.get("HTTPRoute", "default", "shop").unwrap();
    assert_eq!(primary["spec"]["hostnames"][0], "shop.deckhand.local");
    assert_eq!(primary["spec"]["rules"][0]["backendRefs"][0]["name"], "web");

    let sibling = cp.get("HTTPRoute", "default", "shop-shop").unwrap();
    assert_eq!(sibling["spec"]["hostnames"][0], "shop-shop.deckhand.local");
    assert_eq!(sibling["spec"]["rules"][0]["backendRefs"][0]["name"], "shop");
    assert_eq!(sibling["metadata"]["labels"]["deckhand.io/project"], "shop");
}
