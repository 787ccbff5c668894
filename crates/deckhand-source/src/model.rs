//! Canonical description of one runnable service

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default port when a source declares none
pub const DEFAULT_PORT: u16 = 80;

/// Transport protocol of a port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP (the default)
    #[default]
    Tcp,
    /// UDP
    Udp,
    /// SCTP
    Sctp,
}

impl Protocol {
    /// Parse a compose protocol suffix (`tcp`, `udp`, `sctp`), case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            "sctp" => Some(Self::Sctp),
            _ => None,
        }
    }

    /// Kubernetes spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
        }
    }
}

/// One exposed port: the container listens on `container_port`, the cluster
/// service publishes `service_port`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port the workload listens on
    pub container_port: u16,
    /// Port exposed by the cluster service
    pub service_port: u16,
    /// Transport protocol
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// Same port on both sides
    pub fn same(port: u16) -> Self {
        Self {
            container_port: port,
            service_port: port,
            protocol: Protocol::Tcp,
        }
    }

    /// Service port `service_port` forwarding to `container_port`
    pub fn new(service_port: u16, container_port: u16) -> Self {
        Self {
            container_port,
            service_port,
            protocol: Protocol::Tcp,
        }
    }
}

/// A named volume mounted into the container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountSpec {
    /// Volume name (DNS label)
    pub volume: String,
    /// Absolute path inside the container
    pub mount_path: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
}

/// One service to run: from a compose entry, a resolved build recipe, or a
/// direct image request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service name (DNS label, unique within a request)
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Exposed ports, never empty once translated
    pub ports: Vec<PortMapping>,
    /// Literal environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Volume mounts
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountSpec>,
    /// Replica count
    pub replicas: u32,
    /// Restart policy as declared by the source (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    /// Container entrypoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Container arguments override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

impl ServiceSpec {
    /// A single-replica service running `image` on `port`
    pub fn from_image(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ports: vec![PortMapping::same(port)],
            env: BTreeMap::new(),
            volume_mounts: Vec::new(),
            replicas: 1,
            restart_policy: None,
            command: None,
            args: None,
        }
    }

    /// The first declared port, or the default
    pub fn primary_port(&self) -> PortMapping {
        self.ports
            .first()
            .copied()
            .unwrap_or_else(|| PortMapping::same(DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parses_suffixes_case_insensitively() {
        assert_eq!(Protocol::parse("udp"), Some(Protocol::Udp));
        assert_eq!(Protocol::parse("TCP"), Some(Protocol::Tcp));
        assert_eq!(Protocol::parse("quic"), None);
        assert_eq!(Protocol::Sctp.as_str(), "SCTP");
    }

    #[test]
    fn image_service_defaults_to_one_replica() {
        let spec = ServiceSpec::from_image("web", "nginx:1.27", 8080);
        assert_eq!(spec.replicas, 1);
        assert_eq!(spec.primary_port(), PortMapping::same(8080));
    }

    #[test]
    fn primary_port_falls_back_to_default() {
        let mut spec = ServiceSpec::from_image("web", "nginx", 80);
        spec.ports.clear();
        assert_eq!(spec.primary_port().container_port, DEFAULT_PORT);
    }

    #[test]
    fn port_mapping_serializes_protocol_uppercase() {
        let json = serde_json::to_value(PortMapping::new(8080, 80)).unwrap();
        assert_eq!(json["containerPort"], 80);
        assert_eq!(json["servicePort"], 8080);
        assert_eq!(json["protocol"], "TCP");
    }
}
