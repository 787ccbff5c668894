//! Common types for deckhand: errors, resource metadata, naming and YAML helpers

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod naming;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "deckhand";

/// Label key identifying the application a resource belongs to
pub const LABEL_APP: &str = "app";

/// Label key marking resources created by this system
pub const LABEL_DEPLOYED_BY: &str = "deployed-by";

/// Value of [`LABEL_DEPLOYED_BY`] on every resource we declare
pub const DEPLOYED_BY_DECKHAND: &str = "deckhand";

/// Label key grouping the services of one multi-service (compose) deployment
pub const LABEL_PROJECT: &str = "deckhand.io/project";

/// Namespace label that turns on mesh sidecar injection
pub const LABEL_MESH_INJECTION: &str = "istio-injection";

/// Label selector matching everything deckhand has deployed
pub const DEPLOYED_BY_SELECTOR: &str = "deployed-by=deckhand";
