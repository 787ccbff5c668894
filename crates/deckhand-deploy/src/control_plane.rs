//! The cluster control plane as seen by the orchestrator

use std::collections::BTreeMap;

use async_trait::async_trait;
use deckhand_common::Error;
use deckhand_workload::ObjectPatch;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

/// Declarative access to cluster objects.
///
/// Objects are plain JSON carrying their own `apiVersion`, `kind` and
/// `metadata`. Declaring the same object twice converges on one object.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create or update an object to match `object`
    async fn declare(&self, object: &Value) -> Result<(), Error>;

    /// Apply a partial update to an existing object
    async fn patch(&self, patch: &ObjectPatch) -> Result<(), Error>;

    /// Delete an object. Returns `false` when it did not exist.
    async fn delete(&self, kind: &str, name: &str, namespace: &str) -> Result<bool, Error>;

    /// List objects of `kind`. An empty `namespace` lists across namespaces,
    /// an empty `selector` matches every object.
    async fn list(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<Value>, Error>;

    /// Read a Secret's decoded data, `None` if it does not exist
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;
}

/// `Kind/name` for log fields and report entries
pub fn object_ref(object: &Value) -> String {
    format!(
        "{}/{}",
        object["kind"].as_str().unwrap_or_default(),
        object["metadata"]["name"].as_str().unwrap_or_default()
    )
}
