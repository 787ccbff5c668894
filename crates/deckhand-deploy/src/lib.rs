//! Deployment pipeline for deckhand
//!
//! The [`Orchestrator`] plans a request (classify, translate, synthesize),
//! declares the result to the [`ControlPlane`], then layers storage, object
//! storage, exposure, mesh policy, access control and generated credentials
//! on top in a fixed order. Upstream systems sit behind traits:
//!
//! - [`ControlPlane`] with [`KubeControlPlane`] over the Kubernetes API
//! - [`ChartInstaller`] with [`HelmInstaller`] running `helm`
//! - [`IdentityProvider`] with [`KeycloakAdmin`] for OIDC clients
//!
//! Generated credentials are persisted by the [`CredentialVault`] before
//! they are returned.

#![deny(missing_docs)]

pub mod chart;
pub mod config;
pub mod control_plane;
pub mod credentials;
pub mod identity;
pub mod integrations;
pub mod kube_client;
pub mod orchestrator;
pub mod report;
pub mod vault;

pub use chart::{ChartInstaller, HelmInstaller};
pub use config::DeployerConfig;
pub use control_plane::ControlPlane;
pub use credentials::CredentialRecord;
pub use identity::{IdentityProvider, KeycloakAdmin, NoIdentityProvider, OidcClient};
pub use integrations::{ExposureRequest, ExposureTier, IntegrationConfig, StorageRequest};
pub use kube_client::KubeControlPlane;
pub use orchestrator::{DeployPlan, DeployRequest, DeploySource, Orchestrator, PlanSummary};
pub use report::{AppSummary, DeleteReport, DeployReport, Step, StepOutcome};
pub use vault::CredentialVault;
