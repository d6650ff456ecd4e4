//! The listener grammar and outbound peer directive:
//! `<proto>:<iface>:<port>` for `-p`/`[[listen]]` entries, and
//! `dts:<host>:<port>` for an outbound peer directive.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proto {
    Sis,
    Dts,
    Smtp,
    Http,
    TestPing,
}

impl Proto {
    pub fn as_str(self) -> &'static str {
        match self {
            Proto::Sis => "sis",
            Proto::Dts => "dts",
            Proto::Smtp => "smtp",
            Proto::Http => "http",
            Proto::TestPing => "test_ping",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ListenerSpecError {
    #[error("listener spec {0:?} must have the form <proto>:<iface>:<port>")]
    Malformed(String),
    #[error("unknown protocol {0:?} (expected one of sis, dts, smtp, http, test_ping)")]
    UnknownProto(String),
    #[error("invalid interface address {0:?}: {1}")]
    BadIface(String, std::net::AddrParseError),
    #[error("invalid port {0:?}: {1}")]
    BadPort(String, std::num::ParseIntError),
}

impl FromStr for Proto {
    type Err = ListenerSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sis" => Ok(Proto::Sis),
            "dts" => Ok(Proto::Dts),
            "smtp" => Ok(Proto::Smtp),
            "http" => Ok(Proto::Http),
            "test_ping" => Ok(Proto::TestPing),
            other => Err(ListenerSpecError::UnknownProto(other.to_string())),
        }
    }
}

/// One `-p <proto>:<iface>:<port>` CLI flag or `[[listen]]` table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSpec {
    pub proto: Proto,
    pub addr: SocketAddr,
}

impl FromStr for ListenerSpec {
    type Err = ListenerSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(proto), Some(iface), Some(port)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ListenerSpecError::Malformed(s.to_string()));
        };
        let proto: Proto = proto.parse()?;
        let ip: IpAddr = iface
            .parse()
            .map_err(|e| ListenerSpecError::BadIface(iface.to_string(), e))?;
        let port: u16 = port
            .parse()
            .map_err(|e| ListenerSpecError::BadPort(port.to_string(), e))?;
        Ok(Self { proto, addr: SocketAddr::new(ip, port) })
    }
}

/// An outbound peer directive, `dts:<host>:<port>`, given as a CLI
/// positional argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub host: String,
    pub port: u16,
}

impl FromStr for PeerSpec {
    type Err = ListenerSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("dts:")
            .ok_or_else(|| ListenerSpecError::Malformed(s.to_string()))?;
        let (host, port) =
            rest.rsplit_once(':').ok_or_else(|| ListenerSpecError::Malformed(s.to_string()))?;
        let port: u16 =
            port.parse().map_err(|e| ListenerSpecError::BadPort(port.to_string(), e))?;
        Ok(Self { host: host.to_string(), port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_listener_spec() {
        let spec: ListenerSpec = "sis:0.0.0.0:5066".parse().unwrap();
        assert_eq!(spec.proto, Proto::Sis);
        assert_eq!(spec.addr.port(), 5066);
    }

    #[test]
    fn rejects_unknown_proto() {
        assert!(matches!(
            "carrier_pigeon:0.0.0.0:1".parse::<ListenerSpec>(),
            Err(ListenerSpecError::UnknownProto(_))
        ));
    }

    #[test]
    fn parses_peer_directive() {
        let peer: PeerSpec = "dts:192.0.2.10:5067".parse().unwrap();
        assert_eq!(peer.host, "192.0.2.10");
        assert_eq!(peer.port, 5067);
    }

    #[test]
    fn peer_directive_requires_dts_prefix() {
        assert!("sis:192.0.2.10:5067".parse::<PeerSpec>().is_err());
    }
}
