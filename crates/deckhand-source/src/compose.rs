//! Compose file translation
//!
//! Turns each compose service into a [`ServiceSpec`]. Services that only
//! declare `build:` are skipped and reported, never given a placeholder
//! image: deckhand does not build images.

use std::collections::BTreeMap;

use deckhand_common::naming::sanitize_dns_label;
use deckhand_common::yaml::parse_yaml;
use deckhand_common::Error;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{ServiceSpec, VolumeMountSpec};
use crate::ports::{is_web_port, parse_ports};

/// A service that should get an externally reachable route
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCandidate {
    /// Service name
    pub service: String,
    /// Service port the route forwards to
    pub port: u16,
    /// The first candidate in declaration order gets the project's hostname
    pub primary: bool,
}

/// Output of translating one compose file
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    /// Translatable services, in declaration order
    pub services: Vec<ServiceSpec>,
    /// Services with a well-known web port
    pub route_candidates: Vec<RouteCandidate>,
    /// Services omitted because they have no image
    pub skipped: Vec<String>,
    /// Things that were dropped or approximated
    pub warnings: Vec<String>,
}

impl Translation {
    /// The primary route candidate, if any
    pub fn primary_route(&self) -> Option<&RouteCandidate> {
        self.route_candidates.iter().find(|c| c.primary)
    }
}

/// Translate compose `text` for project `project`.
///
/// Fails with an input error when the text is not a compose document, a
/// service is malformed, or two services sanitize to the same name.
pub fn translate(text: &str, project: &str) -> Result<Translation, Error> {
    let doc = parse_yaml(text)?;
    let services = doc
        .get("services")
        .and_then(|s| s.as_object())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::input_for_field("services", "compose file declares no services"))?;

    let mut out = Translation::default();

    for (raw_name, body) in services {
        let name = sanitize_dns_label(raw_name);
        if name.is_empty() {
            return Err(Error::input_for_field(
                "services",
                format!("service name '{}' has no usable characters", raw_name),
            ));
        }
        if out.services.iter().any(|s| s.name == name) || out.skipped.contains(&name) {
            return Err(Error::input_for_field(
                format!("services.{}", raw_name),
                format!("duplicate service name '{}'", name),
            ));
        }

        let empty = Map::new();
        let body = body.as_object().unwrap_or(&empty);

        let Some(image) = body.get("image").and_then(|i| i.as_str()) else {
            let reason = if body.contains_key("build") {
                "declares build but no image; building from source is not supported"
            } else {
                "declares no image"
            };
            warn!(project = %project, service = %name, reason, "skipping compose service");
            out.warnings.push(format!("service '{}' skipped: {}", name, reason));
            out.skipped.push(name);
            continue;
        };

        let spec = translate_service(&name, image, body, &mut out.warnings)?;
        if let Some(port) = spec
            .ports
            .iter()
            .find(|p| is_web_port(p.service_port) || is_web_port(p.container_port))
        {
            let primary = out.route_candidates.is_empty();
            out.route_candidates.push(RouteCandidate {
                service: name.clone(),
                port: port.service_port,
                primary,
            });
        }
        out.services.push(spec);
    }

    debug!(
        project = %project,
        services = out.services.len(),
        skipped = out.skipped.len(),
        routes = out.route_candidates.len(),
        "translated compose file"
    );
    Ok(out)
}

fn translate_service(
    name: &str,
    image: &str,
    body: &Map<String, Value>,
    warnings: &mut Vec<String>,
) -> Result<ServiceSpec, Error> {
    let port_entries = match body.get("ports") {
        Some(Value::Array(entries)) => entries.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => {
            return Err(Error::input_for_field(
                format!("services.{}.ports", name),
                "ports must be a list",
            ))
        }
    };
    let ports = parse_ports(port_entries).map_err(|e| {
        Error::input_for_field(format!("services.{}.ports", name), e.to_string())
    })?;

    let mut spec = ServiceSpec::from_image(name, image, 0);
    spec.ports = ports;
    spec.env = environment(name, body.get("environment"), warnings);
    spec.volume_mounts = volume_mounts(name, body.get("volumes"), warnings);
    spec.command = string_list(body.get("entrypoint"));
    spec.args = string_list(body.get("command"));

    if let Some(replicas) = body
        .get("deploy")
        .and_then(|d| d.get("replicas"))
        .and_then(|r| r.as_u64())
    {
        spec.replicas = u32::try_from(replicas).unwrap_or(u32::MAX).max(1);
    }

    if let Some(restart) = body.get("restart").and_then(|r| r.as_str()) {
        if restart != "always" && restart != "unless-stopped" {
            warnings.push(format!(
                "service '{}': restart policy '{}' is not supported, pods always restart",
                name, restart
            ));
        }
        spec.restart_policy = Some(restart.to_string());
    }

    Ok(spec)
}

/// `environment:` as a `KEY=VALUE` list or a map
fn environment(
    service: &str,
    value: Option<&Value>,
    warnings: &mut Vec<String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    match value {
        Some(Value::Array(items)) => {
            for item in items.iter().filter_map(|i| i.as_str()) {
                match item.split_once('=') {
                    Some((k, v)) => {
                        env.insert(k.to_string(), v.to_string());
                    }
                    None => warnings.push(format!(
                        "service '{}': environment variable '{}' has no value and was skipped",
                        service, item
                    )),
                }
            }
        }
        Some(Value::Object(map)) => {
            for (k, v) in map {
                match scalar_to_string(v) {
                    Some(s) => {
                        env.insert(k.clone(), s);
                    }
                    None => warnings.push(format!(
                        "service '{}': environment variable '{}' has no value and was skipped",
                        service, k
                    )),
                }
            }
        }
        _ => {}
    }
    env
}

/// Named volumes become pod-local volumes; host bind mounts cannot be honored
fn volume_mounts(
    service: &str,
    value: Option<&Value>,
    warnings: &mut Vec<String>,
) -> Vec<VolumeMountSpec> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut mounts = Vec::new();
    for item in items {
        let (source, target, read_only) = match item {
            Value::String(s) => {
                let mut parts = s.splitn(3, ':');
                let first = parts.next().unwrap_or_default();
                match parts.next() {
                    Some(target) => (
                        Some(first.to_string()),
                        target.to_string(),
                        parts.next().is_some_and(|m| m.split(',').any(|o| o == "ro")),
                    ),
                    None => (None, first.to_string(), false),
                }
            }
            Value::Object(map) => (
                map.get("source").and_then(|s| s.as_str()).map(String::from),
                map.get("target")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string(),
                map.get("read_only").and_then(|r| r.as_bool()).unwrap_or(false),
            ),
            _ => continue,
        };

        if !target.starts_with('/') {
            warnings.push(format!(
                "service '{}': volume target '{}' is not an absolute path and was skipped",
                service, target
            ));
            continue;
        }

        let volume = match source {
            Some(src) if src.starts_with('.') || src.starts_with('/') || src.starts_with('~') => {
                warnings.push(format!(
                    "service '{}': bind mount '{}' was skipped",
                    service, src
                ));
                continue;
            }
            Some(src) => sanitize_dns_label(&src),
            // Anonymous volume: name it after the mount path
            None => sanitize_dns_label(&format!("{}-{}", service, target)),
        };
        if volume.is_empty() || mounts.iter().any(|m: &VolumeMountSpec| m.volume == volume) {
            continue;
        }

        mounts.push(VolumeMountSpec {
            volume,
            mount_path: target,
            read_only,
        });
    }
    mounts
}

/// `command:`/`entrypoint:` as a list or a whitespace-separated string
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::String(s) => {
            let parts: Vec<String> = s.split_whitespace().map(String::from).collect();
            (!parts.is_empty()).then_some(parts)
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            (!parts.is_empty()).then_some(parts)
        }
        _ => None,
    }
}

fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
