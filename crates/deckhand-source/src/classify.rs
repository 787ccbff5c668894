//! Content classification
//!
//! Decides what kind of deployable artifact a blob of text is. Detection is
//! an ordered list of signatures and the first match wins; ordering is the
//! only disambiguation (there is no scoring), so a compose file that happens
//! to carry a `kind:` key still classifies as compose unless it also carries
//! an `apiVersion:` marker.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Keys under `services:`-level indentation that are never service names
const RESERVED_COMPOSE_KEYS: &[&str] = &["version", "services", "volumes", "networks"];

static API_VERSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*(?:-\s+)?apiversion\s*:").expect("apiVersion marker regex is valid")
});

static KIND_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*(?:-\s+)?kind\s*:").expect("kind marker regex is valid")
});

/// Top-level (or list item) kinds only; nested `kind:` keys are references
static TOP_LEVEL_KIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^(?:-\s+)?kind:\s*["']?([A-Za-z][A-Za-z0-9]*)"#)
        .expect("top-level kind regex is valid")
});

static ANY_KIND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:-\s+)?kind:\s*["']?([A-Za-z][A-Za-z0-9]*)"#)
        .expect("kind regex is valid")
});

static SERVICES_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^services\s*:").expect("services regex is valid"));

static IMAGE_OR_BUILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s+(?:image|build)\s*:").expect("image/build regex is valid")
});

static COMPOSE_SERVICE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^  ["']?([A-Za-z0-9][A-Za-z0-9_.-]*)["']?\s*:"#)
        .expect("service key regex is valid")
});

static FROM_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*FROM\s+(?:--platform=\S+\s+)?([^\s:]\S*)")
        .expect("FROM regex is valid")
});

static CHART_API_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^apiVersion\s*:").expect("chart apiVersion regex is valid"));

static CHART_APP_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^appVersion\s*:").expect("appVersion regex is valid"));

static CHART_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^name\s*:\s*["']?([^\s"'#]+)"#).expect("chart name regex is valid")
});

/// Raw, untrusted input as submitted
#[derive(Clone, Debug, Default)]
pub struct SourceBlob {
    /// File content
    pub text: String,
    /// Filename the caller supplied, if any
    pub declared_filename: Option<String>,
}

impl SourceBlob {
    /// Wrap text with an optional filename
    pub fn new(text: impl Into<String>, declared_filename: Option<String>) -> Self {
        Self {
            text: text.into(),
            declared_filename,
        }
    }

    /// Classify this blob
    pub fn classify(&self) -> Classification {
        classify(&self.text, self.declared_filename.as_deref())
    }
}

/// Format tag without evidence, for dispatch and display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    /// Native cluster manifest (YAML or JSON)
    Manifest,
    /// Multi-service compose file
    Compose,
    /// Container build recipe
    DockerBuild,
    /// Chart metadata
    HelmChart,
    /// Nothing recognizable
    Unknown,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manifest => "manifest",
            Self::Compose => "compose",
            Self::DockerBuild => "dockerBuild",
            Self::HelmChart => "helmChart",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of classification: exactly one format, with format-specific evidence
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "camelCase")]
pub enum Classification {
    /// Detected object kinds, distinct, in first-seen order
    Manifest {
        /// Kinds found in the text
        kinds: Vec<String>,
    },
    /// Declared service names
    Compose {
        /// Service names in declaration order
        services: Vec<String>,
    },
    /// Base image of the (first) FROM directive
    #[serde(rename_all = "camelCase")]
    DockerBuild {
        /// Base image token
        base_image: String,
    },
    /// Declared chart name
    HelmChart {
        /// Chart name
        chart: String,
    },
    /// No signature matched
    Unknown,
}

impl Classification {
    /// The format tag
    pub fn format(&self) -> SourceFormat {
        match self {
            Self::Manifest { .. } => SourceFormat::Manifest,
            Self::Compose { .. } => SourceFormat::Compose,
            Self::DockerBuild { .. } => SourceFormat::DockerBuild,
            Self::HelmChart { .. } => SourceFormat::HelmChart,
            Self::Unknown => SourceFormat::Unknown,
        }
    }
}

/// Classify `text`. Never fails; the worst case is [`Classification::Unknown`].
pub fn classify(text: &str, filename: Option<&str>) -> Classification {
    let result = detect(text, filename);
    debug!(
        format = %result.format(),
        filename = filename.unwrap_or(""),
        "classified source"
    );
    result
}

fn detect(text: &str, filename: Option<&str>) -> Classification {
    if API_VERSION_MARKER.is_match(text) && KIND_MARKER.is_match(text) {
        return Classification::Manifest {
            kinds: manifest_kinds(text),
        };
    }

    let compose_hint = filename.is_some_and(is_compose_filename);
    if (SERVICES_BLOCK.is_match(text) && IMAGE_OR_BUILD.is_match(text)) || compose_hint {
        return Classification::Compose {
            services: compose_services(text),
        };
    }

    if let Some(caps) = FROM_DIRECTIVE.captures(text) {
        return Classification::DockerBuild {
            base_image: caps[1].to_string(),
        };
    }

    if CHART_API_VERSION.is_match(text) && CHART_APP_VERSION.is_match(text) {
        if let Some(caps) = CHART_NAME.captures(text) {
            return Classification::HelmChart {
                chart: caps[1].to_string(),
            };
        }
    }

    if let Some(kinds) = json_manifest_kinds(text) {
        return Classification::Manifest { kinds };
    }

    Classification::Unknown
}

/// Whether a filename follows compose naming (`docker-compose.yml`, `compose.yaml`, ...)
pub fn is_compose_filename(filename: &str) -> bool {
    let base = filename.rsplit('/').next().unwrap_or(filename).to_ascii_lowercase();
    base.contains("compose") && (base.ends_with(".yml") || base.ends_with(".yaml"))
}

fn manifest_kinds(text: &str) -> Vec<String> {
    let mut kinds = distinct_captures(&TOP_LEVEL_KIND, text);
    if kinds.is_empty() {
        kinds = distinct_captures(&ANY_KIND, text);
    }
    kinds
}

fn distinct_captures(re: &Regex, text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let kind = &caps[1];
        if !out.iter().any(|k| k == kind) {
            out.push(kind.to_string());
        }
    }
    out
}

/// Service names: two-space-indented keys inside the top-level `services:` block
fn compose_services(text: &str) -> Vec<String> {
    let mut services = Vec::new();
    let mut in_services = false;

    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') {
            in_services = SERVICES_BLOCK.is_match(line);
            continue;
        }
        if !in_services {
            continue;
        }
        if let Some(caps) = COMPOSE_SERVICE_KEY.captures(line) {
            let name = &caps[1];
            if !RESERVED_COMPOSE_KEYS.contains(&name) && !services.iter().any(|s| s == name) {
                services.push(name.to_string());
            }
        }
    }
    services
}

fn json_manifest_kinds(text: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    value.get("apiVersion")?;
    let kind = value.get("kind")?.as_str()?;

    let mut kinds = vec![kind.to_string()];
    if let Some(items) = value.get("items").and_then(|i| i.as_array()) {
        for item_kind in items.iter().filter_map(|i| i.get("kind")?.as_str()) {
            if !kinds.iter().any(|k| k == item_kind) {
                kinds.push(item_kind.to_string());
            }
        }
    }
    Some(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Story: Each supported format is recognized with its evidence
    // =========================================================================

    #[test]
    fn native_manifest_reports_kinds() {
        let text = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: my-app\nspec:\n  replicas: 3\n";
        let result = classify(text, Some("deployment.yaml"));
        assert_eq!(
            result,
            Classification::Manifest {
                kinds: vec!["Deployment".to_string()]
            }
        );
    }

    #[test]
    fn multi_document_manifest_lists_distinct_kinds_in_order() {
        let text = "apiVersion: v1\nkind: Service\n---\napiVersion: apps/v1\nkind: Deployment\n---\napiVersion: v1\nkind: Service\n";
        let result = classify(text, None);
        assert_eq!(
            result,
            Classification::Manifest {
                kinds: vec!["Service".to_string(), "Deployment".to_string()]
            }
        );
    }

    #[test]
    fn nested_kind_references_are_not_evidence() {
        let text = "apiVersion: gateway.networking.k8s.io/v1\nkind: HTTPRoute\nspec:\n  parentRefs:\n    - kind: Gateway\n      name: public\n";
        match classify(text, None) {
            Classification::Manifest { kinds } => assert_eq!(kinds, vec!["HTTPRoute"]),
            other => panic!("expected manifest, got {other:?}"),
        }
    }

    #[test]
    fn compose_reports_service_names() {
        let text = "version: '3.8'\nservices:\n  web:\n    image: nginx:latest\n    ports:\n      - \"80:80\"\n  db:\n    image: postgres:15\nvolumes:\n  data:\n";
        let result = classify(text, Some("docker-compose.yml"));
        assert_eq!(
            result,
            Classification::Compose {
                services: vec!["web".to_string(), "db".to_string()]
            }
        );
    }

    #[test]
    fn dockerfile_reports_base_image() {
        let text = "FROM python:3.11-slim\nRUN pip install flask\nCOPY . /app\nCMD [\"python\", \"/app/app.py\"]\n";
        let result = classify(text, Some("Dockerfile"));
        assert_eq!(
            result,
            Classification::DockerBuild {
                base_image: "python:3.11-slim".to_string()
            }
        );
    }

    #[test]
    fn dockerfile_platform_flag_is_skipped() {
        let text = "FROM --platform=linux/amd64 golang:1.22 AS build\n";
        match classify(text, None) {
            Classification::DockerBuild { base_image } => assert_eq!(base_image, "golang:1.22"),
            other => panic!("expected build recipe, got {other:?}"),
        }
    }

    #[test]
    fn chart_metadata_reports_chart_name() {
        let text = "apiVersion: v2\nname: my-chart\ndescription: A Helm chart\nappVersion: \"1.0.0\"\nversion: 0.1.0\n";
        let result = classify(text, Some("Chart.yaml"));
        assert_eq!(
            result,
            Classification::HelmChart {
                chart: "my-chart".to_string()
            }
        );
    }

    #[test]
    fn json_manifest_falls_back_to_manifest() {
        let text = r#"{"apiVersion": "v1", "kind": "Service", "metadata": {"name": "my-service"}, "spec": {"ports": [{"port": 80}]}}"#;
        let result = classify(text, Some("service.json"));
        assert_eq!(
            result,
            Classification::Manifest {
                kinds: vec!["Service".to_string()]
            }
        );
    }

    #[test]
    fn json_list_includes_item_kinds() {
        let text = r#"{"apiVersion": "v1", "kind": "List", "items": [{"kind": "Service"}, {"kind": "Deployment"}]}"#;
        match classify(text, None) {
            Classification::Manifest { kinds } => {
                assert_eq!(kinds, vec!["List", "Service", "Deployment"])
            }
            other => panic!("expected manifest, got {other:?}"),
        }
    }

    // =========================================================================
    // Story: Precedence decides overlaps, regardless of marker position
    // =========================================================================

    #[test]
    fn compose_with_stray_kind_stays_compose() {
        let text = "services:\n  app:\n    image: myapp:1\n    labels:\n      kind: frontend\n";
        assert_eq!(classify(text, None).format(), SourceFormat::Compose);
    }

    #[test]
    fn manifest_signature_beats_compose_signature_in_any_order() {
        let manifest_first = "apiVersion: v1\nkind: ConfigMap\ndata:\n  x: y\nservices:\n  web:\n    image: nginx\n";
        let compose_first = "services:\n  web:\n    image: nginx\napiVersion: v1\nkind: ConfigMap\n";
        assert_eq!(classify(manifest_first, None).format(), SourceFormat::Manifest);
        assert_eq!(classify(compose_first, None).format(), SourceFormat::Manifest);
    }

    #[test]
    fn chart_is_not_mistaken_for_manifest() {
        // Chart.yaml has apiVersion but no kind
        let text = "apiVersion: v2\nname: grafana\nappVersion: 10.0.0\n";
        assert_eq!(classify(text, None).format(), SourceFormat::HelmChart);
    }

    #[test]
    fn compose_filename_alone_is_enough() {
        let text = "x-common: &common\n";
        assert_eq!(
            classify(text, Some("deploy/compose.yaml")).format(),
            SourceFormat::Compose
        );
    }

    // =========================================================================
    // Story: Garbage never errors
    // =========================================================================

    #[test]
    fn invalid_yaml_is_unknown() {
        assert_eq!(
            classify("this: is: not: valid: yaml: [", None),
            Classification::Unknown
        );
        assert_eq!(classify("", None), Classification::Unknown);
        assert_eq!(classify("{\"kind\": \"Service\"}", None), Classification::Unknown);
    }

    #[test]
    fn classification_serializes_with_format_tag() {
        let json = serde_json::to_value(Classification::DockerBuild {
            base_image: "nginx".to_string(),
        })
        .unwrap();
        assert_eq!(json["format"], "dockerBuild");
        assert_eq!(json["baseImage"], "nginx");
    }

    #[test]
    fn blob_classifies_itself() {
        let blob = SourceBlob::new("FROM nginx:1.27\n", Some("Dockerfile".to_string()));
        assert_eq!(blob.classify().format(), SourceFormat::DockerBuild);
    }

    #[test]
    fn compose_filenames() {
        assert!(is_compose_filename("docker-compose.yml"));
        assert!(is_compose_filename("compose.yaml"));
        assert!(is_compose_filename("stack/docker-compose.prod.yaml"));
        assert!(!is_compose_filename("Dockerfile"));
        assert!(!is_compose_filename("compose.txt"));
    }
}
