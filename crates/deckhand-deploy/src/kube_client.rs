//! [`ControlPlane`] backed by the Kubernetes API
//!
//! Objects are declared with server-side apply under the `deckhand` field
//! manager. Patches use strategic merge for built-in kinds and JSON merge for
//! custom resources, which the API server cannot strategically merge.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deckhand_common::kube_utils::{
    api_resource_for_kind, api_version_for_kind, is_cluster_scoped, manifest_metadata,
    supports_strategic_merge, ManifestMetadata,
};
use deckhand_common::{Error, FIELD_MANAGER};
use deckhand_workload::ObjectPatch;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::Client;
use serde_json::Value;
use tracing::debug;

use crate::control_plane::{object_ref, ControlPlane};

/// Kubernetes-backed control plane
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    timeout: Duration,
}

impl KubeControlPlane {
    /// Wrap an existing client; every call is bounded by `timeout`
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Connect using the ambient kubeconfig or in-cluster config
    pub async fn connect(timeout: Duration) -> Result<Self, Error> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, timeout))
    }

    fn dynamic_api(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        cluster_scoped: bool,
    ) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() && !cluster_scoped => {
                Api::namespaced_with(self.client.clone(), ns, ar)
            }
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    /// Resource and scope of a manifest object
    ///
    /// Kinds outside the built-in tables are looked up through API discovery
    /// so their plural and scope come from the server.
    async fn resolve(&self, meta: &ManifestMetadata) -> Result<(ApiResource, bool), Error> {
        if api_version_for_kind(&meta.kind).is_some() || is_cluster_scoped(&meta.kind) {
            return Ok((meta.api_resource.clone(), is_cluster_scoped(&meta.kind)));
        }

        let ar = &meta.api_resource;
        let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
        let discovery = self
            .bounded(format!("discover {}", ar.api_version), async {
                Discovery::new(self.client.clone())
                    .filter(&[ar.group.as_str()])
                    .run()
                    .await
            })
            .await?;

        match discovery.resolve_gvk(&gvk) {
            Some((resource, caps)) => Ok((resource, matches!(caps.scope, Scope::Cluster))),
            None => {
                debug!(kind = %meta.kind, api_version = %ar.api_version, "kind not discovered, assuming namespaced");
                Ok((ar.clone(), false))
            }
        }
    }

    async fn bounded<T, F>(&self, operation: String, call: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, kube::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::upstream(operation, e.to_string())),
            Err(_) => Err(Error::upstream_timeout(operation, self.timeout.as_secs())),
        }
    }
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn declare(&self, object: &Value) -> Result<(), Error> {
        let meta = manifest_metadata(object)?;
        let (ar, cluster_scoped) = self.resolve(&meta).await?;
        let api = self.dynamic_api(&ar, meta.namespace.as_deref(), cluster_scoped);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        self.bounded(format!("declare {}", object_ref(object)), async {
            api.patch(&meta.name, &params, &Patch::Apply(object)).await
        })
        .await?;

        debug!(kind = %meta.kind, name = %meta.name, namespace = ?meta.namespace, "declared object");
        Ok(())
    }

    async fn patch(&self, patch: &ObjectPatch) -> Result<(), Error> {
        let ar = api_resource_for_kind(&patch.kind)?;
        let api = self.dynamic_api(&ar, Some(&patch.namespace), is_cluster_scoped(&patch.kind));
        let params = PatchParams::default();
        let operation = format!("patch {}/{}", patch.kind, patch.name);

        if supports_strategic_merge(&ar.api_version) {
            self.bounded(operation, async {
                api.patch(&patch.name, &params, &Patch::Strategic(&patch.body))
                    .await
            })
            .await?;
        } else {
            self.bounded(operation, async {
                api.patch(&patch.name, &params, &Patch::Merge(&patch.body))
                    .await
            })
            .await?;
        }

        debug!(kind = %patch.kind, name = %patch.name, namespace = %patch.namespace, "patched object");
        Ok(())
    }

    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<bool, Error> {
        let ar = api_resource_for_kind(kind)?;
        let api = self.dynamic_api(&ar, Some(namespace), is_cluster_scoped(kind));

        let existed = self
            .bounded(format!("delete {}/{}", kind, name), async {
                match api.delete(name, &DeleteParams::default()).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await?;

        debug!(kind = %kind, name = %name, namespace = %namespace, existed, "deleted object");
        Ok(existed)
    }

    async fn list(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<Value>, Error> {
        let ar = api_resource_for_kind(kind)?;
        let api = self.dynamic_api(&ar, Some(namespace), is_cluster_scoped(kind));
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }

        let list = self
            .bounded(format!("list {}", kind), async { api.list(&params).await })
            .await?;
        list.items
            .into_iter()
            .map(|item| serde_json::to_value(item).map_err(Error::from))
            .collect()
    }

    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = self
            .bounded(format!("read Secret/{}", name), async { api.get_opt(name).await })
            .await?;

        let Some(secret) = secret else {
            return Ok(None);
        };

        let record = format!("{}/{}", namespace, name);
        let mut data = BTreeMap::new();
        for (key, bytes) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(bytes.0).map_err(|_| {
                Error::credential_decode(record.clone(), format!("key '{}' is not UTF-8", key))
            })?;
            data.insert(key, value);
        }
        Ok(Some(data))
    }
}
