//! What a deploy or delete did, step by step

use deckhand_source::SourceFormat;
use serde::Serialize;

use crate::credentials::CredentialRecord;

/// Pipeline steps, in the order they run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Ensure the target namespace
    Namespace,
    /// Declare workloads and services, manifests, or install the chart
    Workload,
    /// Persistent data claim and mount
    Storage,
    /// Scoped object-storage credentials
    ObjectStorage,
    /// Route on a gateway
    Exposure,
    /// Mesh traffic policy
    Mesh,
    /// External authorization policy
    AccessControl,
    /// Generated credentials and OIDC client
    Credentials,
    /// Credential record persisted in the vault
    Vault,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::Workload => "workload",
            Self::Storage => "storage",
            Self::ObjectStorage => "objectStorage",
            Self::Exposure => "exposure",
            Self::Mesh => "mesh",
            Self::AccessControl => "accessControl",
            Self::Credentials => "credentials",
            Self::Vault => "vault",
        };
        f.write_str(s)
    }
}

/// How one step ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StepOutcome {
    /// Everything the step declared was accepted
    Succeeded,
    /// The step did not run
    Skipped {
        /// Why it did not run
        reason: String,
    },
    /// The step ran and an upstream call failed
    Failed {
        /// Upstream error, verbatim
        error: String,
    },
}

impl StepOutcome {
    /// Skipped with `reason`
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Failed with `error`
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }
}

/// One entry of [`DeployReport::steps`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Which step
    pub step: Step,
    /// How it ended
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Result of one deploy request
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    /// Application name
    pub app: String,
    /// Target namespace
    pub namespace: String,
    /// Detected source format
    pub format: SourceFormat,
    /// Every step, in execution order
    pub steps: Vec<StepReport>,
    /// `https://<hostname>` when exposed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_url: Option<String>,
    /// Generated credentials, only once they are in the vault
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialRecord>,
    /// Things dropped or approximated along the way
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DeployReport {
    /// Empty report
    pub fn new(app: impl Into<String>, namespace: impl Into<String>, format: SourceFormat) -> Self {
        Self {
            app: app.into(),
            namespace: namespace.into(),
            format,
            steps: Vec::new(),
            access_url: None,
            credentials: None,
            warnings: Vec::new(),
        }
    }

    /// Append a step outcome
    pub fn record(&mut self, step: Step, outcome: StepOutcome) {
        self.steps.push(StepReport { step, outcome });
    }

    /// Outcome of `step`, if it was recorded
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps
            .iter()
            .find(|s| s.step == step)
            .map(|s| &s.outcome)
    }

    /// Steps that failed; these are the ones worth retrying
    pub fn failed_steps(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed { .. }))
            .map(|s| s.step)
            .collect()
    }

    /// True when no step failed
    pub fn success(&self) -> bool {
        self.failed_steps().is_empty()
    }
}

/// An object delete that failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    /// `Kind/name`
    pub object: String,
    /// Upstream error, verbatim
    pub error: String,
}

/// Result of one delete request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    /// Objects removed, as `Kind/name`
    pub deleted: Vec<String>,
    /// Objects that were already gone
    pub missing: Vec<String>,
    /// Objects that could not be removed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<DeleteFailure>,
}

impl DeleteReport {
    /// True when nothing failed
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One deployed application, as listed
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSummary {
    /// Deployment name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Desired replicas
    pub replicas: i64,
    /// Ready replicas
    pub ready_replicas: i64,
    /// Creation timestamp as reported by the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}
