//! Compose port syntax
//!
//! Accepted forms: `"C"`, `"H:C"`, `"IP:H:C"`, any of those with a `/proto`
//! suffix, a bare integer, or a long-form map `{target, published, protocol}`.
//! The container (target) port is always what the workload listens on; the
//! host (published) port becomes the cluster service port.

use serde_json::Value;
use thiserror::Error;

use crate::model::{PortMapping, Protocol, DEFAULT_PORT};

/// Ports that mark a service as something a browser would talk to
pub const WEB_PORTS: &[u16] = &[80, 443, 3000, 5000, 8000, 8080, 8443, 9000];

/// Why a port entry was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// Not a number in 1..=65535
    #[error("'{0}' is not a valid port number")]
    InvalidNumber(String),
    /// `8000-8010` style ranges
    #[error("port ranges are not supported: '{0}'")]
    Range(String),
    /// Suffix other than tcp/udp/sctp
    #[error("unknown protocol '{0}'")]
    Protocol(String),
    /// Long form without `target`
    #[error("port entry is missing 'target'")]
    MissingTarget,
    /// Anything else (lists, booleans, ...)
    #[error("unsupported port entry: {0}")]
    Unsupported(String),
}

/// Whether a port is in [`WEB_PORTS`]
pub fn is_web_port(port: u16) -> bool {
    WEB_PORTS.contains(&port)
}

/// Parse every entry of a compose `ports` list.
///
/// An empty list yields the default `80 -> 80` mapping so every service gets
/// a reachable network object. Later entries that reuse a service port and
/// protocol are dropped.
pub fn parse_ports(entries: &[Value]) -> Result<Vec<PortMapping>, PortError> {
    let mut ports: Vec<PortMapping> = Vec::with_capacity(entries.len().max(1));
    for entry in entries {
        let port = parse_port(entry)?;
        if !ports
            .iter()
            .any(|p| p.service_port == port.service_port && p.protocol == port.protocol)
        {
            ports.push(port);
        }
    }
    if ports.is_empty() {
        ports.push(PortMapping::same(DEFAULT_PORT));
    }
    Ok(ports)
}

/// Parse one compose port entry
pub fn parse_port(entry: &Value) -> Result<PortMapping, PortError> {
    match entry {
        Value::Number(n) => {
            let port = n
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .filter(|p| *p != 0)
                .ok_or_else(|| PortError::InvalidNumber(n.to_string()))?;
            Ok(PortMapping::same(port))
        }
        Value::String(s) => parse_port_str(s),
        Value::Object(map) => {
            let target = map
                .get("target")
                .ok_or(PortError::MissingTarget)
                .and_then(port_value)?;
            let published = match map.get("published") {
                Some(Value::Null) | None => target,
                Some(v) => port_value(v)?,
            };
            let protocol = match map.get("protocol").and_then(|p| p.as_str()) {
                Some(p) => Protocol::parse(p).ok_or_else(|| PortError::Protocol(p.to_string()))?,
                None => Protocol::Tcp,
            };
            Ok(PortMapping {
                container_port: target,
                service_port: published,
                protocol,
            })
        }
        other => Err(PortError::Unsupported(other.to_string())),
    }
}

/// Parse the short string syntax: `[[IP:]HOST:]CONTAINER[/PROTO]`
pub fn parse_port_str(raw: &str) -> Result<PortMapping, PortError> {
    let raw = raw.trim();
    let (spec, protocol) = match raw.rsplit_once('/') {
        Some((spec, proto)) => (
            spec,
            Protocol::parse(proto).ok_or_else(|| PortError::Protocol(proto.to_string()))?,
        ),
        None => (raw, Protocol::Tcp),
    };

    // rsplitn keeps a bracketed IPv6 host address in the last piece
    let mut parts = spec.rsplitn(3, ':');
    let container = parse_number(parts.next().unwrap_or_default())?;
    let service = match parts.next() {
        Some(host) if !host.is_empty() => parse_number(host)?,
        _ => container,
    };

    Ok(PortMapping {
        container_port: container,
        service_port: service,
        protocol,
    })
}

fn port_value(v: &Value) -> Result<u16, PortError> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| PortError::InvalidNumber(n.to_string())),
        Value::String(s) => parse_number(s),
        other => Err(PortError::Unsupported(other.to_string())),
    }
}

fn parse_number(s: &str) -> Result<u16, PortError> {
    let s = s.trim();
    if s.contains('-') {
        return Err(PortError::Range(s.to_string()));
    }
    s.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| PortError::InvalidNumber(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // Story: Host port becomes the service port, container port wins for the pod
    // =========================================================================

    #[test]
    fn host_and_container_split() {
        let port = parse_port(&json!("8080:80")).unwrap();
        assert_eq!(port.container_port, 80);
        assert_eq!(port.service_port, 8080);
        assert_eq!(port.protocol, Protocol::Tcp);
    }

    #[test]
    fn single_string_port_is_used_on_both_sides() {
        assert_eq!(parse_port(&json!("80")).unwrap(), PortMapping::same(80));
    }

    #[test]
    fn bare_integer_is_used_on_both_sides() {
        assert_eq!(parse_port(&json!(5432)).unwrap(), PortMapping::same(5432));
    }

    #[test]
    fn long_form_without_published_uses_target() {
        let port = parse_port(&json!({"target": 80})).unwrap();
        assert_eq!(port, PortMapping::same(80));

        let port = parse_port(&json!({"target": 80, "published": "8080", "protocol": "udp"})).unwrap();
        assert_eq!(port.service_port, 8080);
        assert_eq!(port.container_port, 80);
        assert_eq!(port.protocol, Protocol::Udp);
    }

    // =========================================================================
    // Story: Protocol suffixes and bind addresses are understood
    // =========================================================================

    #[test]
    fn protocol_suffix_is_stripped_and_kept() {
        let port = parse_port_str("53:53/udp").unwrap();
        assert_eq!(port.container_port, 53);
        assert_eq!(port.protocol, Protocol::Udp);
    }

    #[test]
    fn bind_address_is_ignored() {
        let port = parse_port_str("127.0.0.1:8080:80").unwrap();
        assert_eq!(port, PortMapping::new(8080, 80));

        let port = parse_port_str("[::1]:9090:9000").unwrap();
        assert_eq!(port, PortMapping::new(9090, 9000));
    }

    #[test]
    fn empty_host_port_means_same_as_container() {
        let port = parse_port_str("127.0.0.1::3000").unwrap();
        assert_eq!(port, PortMapping::same(3000));
    }

    // =========================================================================
    // Story: Malformed entries are rejected with a reason
    // =========================================================================

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_port_str("http"), Err(PortError::InvalidNumber(_))));
        assert!(matches!(parse_port_str("0"), Err(PortError::InvalidNumber(_))));
        assert!(matches!(parse_port_str("70000"), Err(PortError::InvalidNumber(_))));
        assert!(matches!(parse_port_str("80/quic"), Err(PortError::Protocol(_))));
        assert!(matches!(parse_port_str("8000-8010:8000-8010"), Err(PortError::Range(_))));
        assert_eq!(parse_port(&json!({"published": 80})), Err(PortError::MissingTarget));
        assert!(matches!(parse_port(&json!(true)), Err(PortError::Unsupported(_))));
    }

    #[test]
    fn empty_list_defaults_to_port_80() {
        assert_eq!(parse_ports(&[]).unwrap(), vec![PortMapping::same(80)]);
    }

    #[test]
    fn duplicate_service_ports_keep_the_first() {
        let ports = parse_ports(&[json!("8080:80"), json!("8080:81"), json!("8080:80/udp")]).unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].container_port, 80);
        assert_eq!(ports[1].protocol, Protocol::Udp);
    }

    #[test]
    fn web_ports_are_recognized() {
        assert!(is_web_port(8080));
        assert!(is_web_port(443));
        assert!(!is_web_port(5432));
    }
}
