//! Server addresses as stored on gateways: `host`, `host:port` or
//! `scheme://host[:port]`.

use std::fmt;

use lorastack_core::Result;

use crate::errors::ERR_INVALID_ADDRESS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

/// Well-known port of a scheme.
pub fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "ws" | "http" => Some(80),
        "wss" | "https" => Some(443),
        "mqtt" => Some(1883),
        "mqtts" => Some(8883),
        _ => None,
    }
}

/// Whether a scheme runs over TLS.
pub fn is_tls(scheme: &str) -> bool {
    matches!(scheme, "wss" | "https" | "mqtts")
}

impl Address {
    /// Parse `address`, using `default_scheme` when it has none.
    pub fn parse(address: &str, default_scheme: &str) -> Result<Self> {
        let invalid = || ERR_INVALID_ADDRESS.with_attribute("address", address);
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (scheme.to_ascii_lowercase(), rest),
            None => (default_scheme.to_string(), trimmed),
        };
        if scheme.is_empty() || !scheme.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+') {
            return Err(invalid());
        }
        // Drop any path.
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(invalid)?),
            };
            (host, port)
        } else if authority.matches(':').count() > 1 {
            // Bare IPv6 address.
            (authority, None)
        } else {
            match authority.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port
            .map(|p| p.parse::<u16>().map_err(|_| invalid()))
            .transpose()?;
        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// The explicit port, else the default of the scheme.
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| default_port(&self.scheme))
    }

    /// `host:port` for dialing. IPv6 hosts are bracketed.
    pub fn authority(&self, fallback_port: u16) -> String {
        let port = self.port_or_default().unwrap_or(fallback_port);
        format!("{}:{port}", self.bracketed_host())
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.bracketed_host())?;
        if let Some(port) = self.port_or_default() {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Normalize a gateway server address to the URI a station connects to.
/// Addresses without scheme get `wss`; the port is inferred from the
/// scheme when absent.
pub fn lns_uri(address: &str) -> Result<String> {
    Ok(Address::parse(address, "wss")?.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_forms() {
        let a = Address::parse("lns.example.com", "wss").unwrap();
        assert_eq!((a.scheme.as_str(), a.host.as_str(), a.port), ("wss", "lns.example.com", None));

        let a = Address::parse("lns.example.com:8887", "wss").unwrap();
        assert_eq!(a.port, Some(8887));

        let a = Address::parse("HTTPS://cups.example.com:443/update-info", "wss").unwrap();
        assert_eq!((a.scheme.as_str(), a.host.as_str(), a.port), ("https", "cups.example.com", Some(443)));

        let a = Address::parse("wss://[::1]:8887", "wss").unwrap();
        assert_eq!((a.host.as_str(), a.port), ("::1", Some(8887)));
        assert_eq!(a.authority(443), "[::1]:8887");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "   ", "wss://", "host:port", "host:70000", "[::1", "we b://x"] {
            assert!(Address::parse(bad, "wss").is_err(), "{bad}");
        }
    }

    #[test]
    fn normalizes_lns_uris() {
        assert_eq!(lns_uri("lns.example.com").unwrap(), "wss://lns.example.com:443");
        assert_eq!(lns_uri("ws://lns.example.com").unwrap(), "ws://lns.example.com:80");
        assert_eq!(lns_uri("lns.example.com:8887").unwrap(), "wss://lns.example.com:8887");
        assert_eq!(lns_uri("wss://lns:443").unwrap(), "wss://lns:443");
        assert_eq!(lns_uri("custom://lns").unwrap(), "custom://lns");
    }

    #[test]
    fn tls_schemes() {
        assert!(is_tls("wss"));
        assert!(is_tls("https"));
        assert!(!is_tls("ws"));
    }
}
