//! Resource synthesis for deckhand
//!
//! Turns a translated service or a bare image into the canonical set of
//! cluster objects (Deployment, Service, and optional storage, route, mesh and
//! access policy objects), plus the patches integrations layer on top.
//!
//! Everything here is pure: no cluster access, deterministic output.

#![deny(missing_docs)]

/// Implement `default_api_version()`/`default_kind()` for a [`HasApiResource`] type
/// so serde can fill them in when deserializing.
///
/// [`HasApiResource`]: deckhand_common::kube_utils::HasApiResource
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as deckhand_common::kube_utils::HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as deckhand_common::kube_utils::HasApiResource>::KIND.to_string()
            }
        }
    };
}

pub mod k8s;
pub mod policy;
pub mod resource_set;
pub mod route;
pub mod synth;

pub use resource_set::{ObjectPatch, ResourceSet};
pub use synth::{synthesize, WorkloadSource, DATA_VOLUME};
