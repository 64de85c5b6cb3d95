use std::{fmt, str::FromStr};

use http::uri::Scheme;
use thiserror::Error;

use crate::{Config, Error};

/// Pool key which identifies the endpoint a connection is made to.
///
/// Direct connections are keyed by scheme and hostname. Connections through a
/// forward proxy are keyed by the proxy address alone, since every request is
/// sent to the proxy regardless of its final destination.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum EndpointKey {
    /// A direct connection, by scheme (`http` or `https`) and hostname.
    Direct(Scheme, String),

    /// A connection to a forward proxy, by proxy host and port.
    Proxy(String, u16),
}

impl EndpointKey {
    /// Compute the key for a connection to `hostname`.
    ///
    /// When a proxy is configured, TLS is rejected: tunneling TLS through the
    /// proxy is not supported.
    pub fn resolve(hostname: &str, tls: bool, config: &Config) -> Result<Self, Error> {
        match config.proxy() {
            Some(_) if tls => Err(Error::TlsThroughProxy),
            Some((host, port)) => Ok(EndpointKey::Proxy(host.to_owned(), port)),
            None if tls => Ok(EndpointKey::Direct(Scheme::HTTPS, hostname.to_owned())),
            None => Ok(EndpointKey::Direct(Scheme::HTTP, hostname.to_owned())),
        }
    }

    /// Returns `true` if this key identifies a proxy connection.
    pub fn is_proxy(&self) -> bool {
        matches!(self, EndpointKey::Proxy(..))
    }

    /// Returns `true` if connections for this key use TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, EndpointKey::Direct(scheme, _) if *scheme == Scheme::HTTPS)
    }

    /// The host part of the key: the destination host for direct
    /// connections, or the proxy host.
    pub fn host(&self) -> &str {
        match self {
            EndpointKey::Direct(_, host) => host,
            EndpointKey::Proxy(host, _) => host,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKey::Direct(scheme, host) => write!(f, "{scheme}://{host}"),
            EndpointKey::Proxy(host, port) => write!(f, "proxy://{host}:{port}"),
        }
    }
}

/// The string form of an endpoint key could not be parsed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The scheme is not one of `http`, `https` or `proxy`.
    #[error("unknown scheme in endpoint key: {0}")]
    UnknownScheme(String),

    /// The key has no host.
    #[error("missing host in endpoint key: {0}")]
    MissingHost(String),

    /// A proxy key has a missing or invalid port.
    #[error("invalid proxy port in endpoint key: {0}")]
    InvalidPort(String),
}

impl FromStr for EndpointKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Err(KeyError::UnknownScheme(s.to_owned()));
        };

        if rest.is_empty() {
            return Err(KeyError::MissingHost(s.to_owned()));
        }

        match scheme {
            "http" => Ok(EndpointKey::Direct(Scheme::HTTP, rest.to_owned())),
            "https" => Ok(EndpointKey::Direct(Scheme::HTTPS, rest.to_owned())),
            "proxy" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| KeyError::InvalidPort(s.to_owned()))?;
                if host.is_empty() {
                    return Err(KeyError::MissingHost(s.to_owned()));
                }
                let port = port
                    .parse()
                    .map_err(|_| KeyError::InvalidPort(s.to_owned()))?;
                Ok(EndpointKey::Proxy(host.to_owned(), port))
            }
            _ => Err(KeyError::UnknownScheme(s.to_owned())),
        }
    }
}
