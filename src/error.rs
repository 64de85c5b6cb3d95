use std::io;

use thiserror::Error;

use crate::tls::TlsError;

/// Connection pool error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// TLS was requested while a forward proxy is configured.
    ///
    /// Tunneling TLS through the proxy is not supported, so this
    /// combination is rejected before any connection is made.
    #[error("use_https=true can't be used with proxy")]
    TlsThroughProxy,

    /// The hostname could not be parsed as an authority, or is not a
    /// valid TLS server name.
    #[error("invalid host: {0}")]
    InvalidHost(String),

    /// The TLS trust configuration could not be built.
    #[error("tls: {0}")]
    Tls(#[from] TlsError),

    /// Error occured connecting to, or handshaking with, the remote host.
    #[error("transport: {0}")]
    Transport(#[from] io::Error),

    /// The connection is not in a state which supports this operation.
    #[error("operation not supported on a {0} connection")]
    InvalidState(&'static str),
}
