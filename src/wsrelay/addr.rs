use std::borrow::Cow;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum AddrError {
    #[error("invalid address {0:?}: {1}")]
    Malformed(String, url::ParseError),
    #[error("address {0:?} has no host")]
    MissingHost(String),
}

/// A parsed `scheme://host[:port][/path]` endpoint specifier.
///
/// Pure value type: parsing does no network I/O, and the listener/dialer
/// decide later whether they understand the scheme.
#[derive(Debug, Clone)]
pub struct AddrSpec {
    pub scheme: String,
    /// `host` or `host:port`. No default port is invented for schemes the
    /// URL standard doesn't know (e.g. `tcp`).
    pub host: String,
    url: Url,
}

impl AddrSpec {
    pub fn parse(raw: &str) -> Result<Self, AddrError> {
        let trimmed = raw.trim();
        // `scheme://:PORT` shorthand means "bind on all interfaces".
        let candidate: Cow<'_, str> = match trimmed.split_once("://") {
            Some((scheme, rest)) if rest.starts_with(':') => {
                Cow::Owned(format!("{scheme}://0.0.0.0{rest}"))
            }
            _ => Cow::Borrowed(trimmed),
        };
        let url =
            Url::parse(&candidate).map_err(|err| AddrError::Malformed(raw.to_string(), err))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AddrError::MissingHost(raw.to_string()))?;
        let host = match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host,
            url,
        })
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.scheme.as_str(), "ws" | "wss")
    }

    /// The full parsed URL. The WebSocket dial needs the whole thing (the
    /// handshake carries the path), not just the authority.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::AddrSpec;

    #[test]
    fn parse_tcp_with_port() {
        let spec = AddrSpec::parse("tcp://127.0.0.1:9000").unwrap();
        assert_eq!(spec.scheme, "tcp");
        assert_eq!(spec.host, "127.0.0.1:9000");
        assert!(!spec.is_websocket());
    }

    #[test]
    fn parse_ws_fills_default_port() {
        let spec = AddrSpec::parse("ws://example.com").unwrap();
        assert_eq!(spec.scheme, "ws");
        assert_eq!(spec.host, "example.com:80");
        assert!(spec.is_websocket());

        let spec = AddrSpec::parse("wss://example.com:8443/path").unwrap();
        assert_eq!(spec.host, "example.com:8443");
        assert!(spec.is_websocket());
    }

    #[test]
    fn parse_trims_and_lowercases_scheme() {
        let spec = AddrSpec::parse("  TCP://10.0.0.1:1234  ").unwrap();
        assert_eq!(spec.scheme, "tcp");
        assert_eq!(spec.host, "10.0.0.1:1234");
    }

    #[test]
    fn parse_port_only_binds_all_interfaces() {
        let spec = AddrSpec::parse("tcp://:9000").unwrap();
        assert_eq!(spec.host, "0.0.0.0:9000");

        let spec = AddrSpec::parse("ws://:8080").unwrap();
        assert_eq!(spec.scheme, "ws");
        assert_eq!(spec.host, "0.0.0.0:8080");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(AddrSpec::parse("not an address").is_err());
        assert!(AddrSpec::parse("").is_err());
    }

    #[test]
    fn parse_requires_host() {
        // Opaque URI with no authority component.
        assert!(AddrSpec::parse("tcp:9000").is_err());
    }
}
