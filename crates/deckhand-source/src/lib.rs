//! Deployment source handling: what kind of artifact a blob is, and what it
//! translates to.
//!
//! - [`classify`]: text plus filename to a [`Classification`]
//! - [`compose`]: multi-service compose files to [`ServiceSpec`]s
//! - [`image`]: build recipes to a runnable pre-built image, or "must build"
//! - [`fetch`]: source-host URL normalization and repository file selection

#![deny(missing_docs)]

pub mod classify;
pub mod compose;
pub mod fetch;
pub mod image;
pub mod model;
pub mod ports;

pub use classify::{classify, Classification, SourceBlob, SourceFormat};
pub use compose::{translate, RouteCandidate, Translation};
pub use fetch::{FetchedSource, GitHubFetcher, RepoIdentity, SourceFetcher};
pub use image::{resolve, Resolution, ResolvedImage};
pub use model::{PortMapping, Protocol, ServiceSpec, VolumeMountSpec};
