//! `sopmq://host[:port]` endpoint URIs, used for ring entries and gossip
//! peer addresses.

use crate::error::SopmqError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The default port for protocol v1 when a URI doesn't specify one.
pub const DEFAULT_PORT: u16 = 7534;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointProto {
    Unknown,
    V1,
}

/// A parsed `sopmq://` endpoint: host, port, and protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    proto: EndpointProto,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            host: host.into(),
            port,
            proto: EndpointProto::V1,
        }
    }

    /// Parses a `sopmq://host[:port]` URI.
    ///
    /// Any scheme other than `sopmq` is an `invalid_protocol_error`; a
    /// missing scheme separator, empty host, or non-numeric port is a
    /// `uri_parse_error`.
    pub fn parse(uri: &str) -> Result<Endpoint, SopmqError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| SopmqError::UriParse(format!("missing scheme in '{uri}'")))?;

        if scheme != "sopmq" {
            return Err(SopmqError::InvalidProtocol(scheme.to_string()));
        }

        if rest.is_empty() {
            return Err(SopmqError::UriParse(format!("missing host in '{uri}'")));
        }

        let (host, port) = match rest.split_once(':') {
            Some((host, port_str)) => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| SopmqError::UriParse(format!("invalid port in '{uri}'")))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };

        if host.is_empty() {
            return Err(SopmqError::UriParse(format!("missing host in '{uri}'")));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
            proto: EndpointProto::V1,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> EndpointProto {
        self.proto
    }

    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sopmq://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_explicit_port() {
        let ep = Endpoint::parse("sopmq://10.0.0.5:9100").unwrap();
        assert_eq!(ep.host(), "10.0.0.5");
        assert_eq!(ep.port(), 9100);
        assert_eq!(ep.protocol(), EndpointProto::V1);
    }

    #[test]
    fn parses_host_with_default_port() {
        let ep = Endpoint::parse("sopmq://node-a").unwrap();
        assert_eq!(ep.host(), "node-a");
        assert_eq!(ep.port(), DEFAULT_PORT);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = Endpoint::parse("http://node-a:80").unwrap_err();
        assert!(matches!(err, SopmqError::InvalidProtocol(_)));
    }

    #[test]
    fn rejects_missing_scheme_separator() {
        let err = Endpoint::parse("node-a:80").unwrap_err();
        assert!(matches!(err, SopmqError::UriParse(_)));
    }

    #[test]
    fn rejects_empty_host() {
        let err = Endpoint::parse("sopmq://:80").unwrap_err();
        assert!(matches!(err, SopmqError::UriParse(_)));
    }

    #[test]
    fn rejects_non_numeric_port() {
        let err = Endpoint::parse("sopmq://node-a:notaport").unwrap_err();
        assert!(matches!(err, SopmqError::UriParse(_)));
    }

    #[test]
    fn display_round_trips_explicit_form() {
        let ep = Endpoint::new("node-a", 9100);
        assert_eq!(ep.to_string(), "sopmq://node-a:9100");
    }
}
