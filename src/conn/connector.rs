//! Connection factory.
//!
//! Builds unconnected [`Connection`]s, choosing between a plain connection to a
//! forward proxy, a plain direct connection, and a TLS connection.

use std::sync::Arc;

use http::uri::Authority;
use rustls::pki_types::ServerName;
use tracing::{debug, trace};

use super::{Connection, Target};
use crate::pool::EndpointKey;
use crate::tls::{default_tls_config, TlsContextProvider};
use crate::{Config, Error};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Build a connection to `hostname`, or to the configured proxy.
///
/// No network I/O happens here; the returned connection must be connected
/// with [`Connection::connect`].
pub(crate) fn create(
    key: EndpointKey,
    hostname: &str,
    tls: bool,
    config: &Config,
    contexts: &TlsContextProvider,
) -> Result<Connection, Error> {
    let target = if let Some((proxy_host, proxy_port)) = config.proxy() {
        if tls {
            return Err(Error::TlsThroughProxy);
        }

        trace!(proxy.host = %proxy_host, proxy.port = proxy_port, "connection via proxy");
        Target::plain(unbracket(proxy_host), proxy_port)
    } else if !tls {
        let (host, port) = host_and_port(hostname, HTTP_PORT)?;
        Target::plain(host, port)
    } else {
        let (host, port) = host_and_port(hostname, HTTPS_PORT)?;

        let context = contexts.context(config)?;
        let tls_config = match context.client_config() {
            Some(tls_config) => tls_config.clone(),
            None => {
                debug!("TLS context is degraded, using default trust configuration");
                Arc::new(default_tls_config()?)
            }
        };

        let server_name = ServerName::try_from(host.clone())
            .map_err(|_| Error::InvalidHost(hostname.to_owned()))?;

        Target::tls(host, port, tls_config, server_name)
    };

    Ok(Connection::new(key, hostname, tls, target))
}

/// Split a `host[:port]` string, using `default_port` when none is given.
fn host_and_port(hostname: &str, default_port: u16) -> Result<(String, u16), Error> {
    let authority: Authority = hostname
        .parse()
        .map_err(|_| Error::InvalidHost(hostname.to_owned()))?;

    if authority.as_str().contains('@') {
        return Err(Error::InvalidHost(hostname.to_owned()));
    }

    let port = authority.port_u16().unwrap_or(default_port);
    Ok((unbracket(authority.host()).to_owned(), port))
}

/// Strip the brackets from an IPv6 literal.
fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|host| host.strip_suffix(']'))
        .unwrap_or(host)
}
