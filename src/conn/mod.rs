//! Client connections managed by the pool.
//!
//! A [`Connection`] is built by the connection factory without touching the
//! network, and then explicitly connected with [`Connection::connect`]. Once
//! connected, the underlying [`Stream`] is available to the caller for request
//! and response I/O. A connection moves through these states:
//!
//! ```text
//! Created -> Connected -> Closed
//! ```
//!
//! While connected, a connection is either checked out (owned by a caller) or
//! pooled (owned by the pool). `Closed` is terminal: a closed connection is never
//! returned to the pool.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::AsyncWriteExt as _;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::pool::{EndpointKey, PoolableConnection};
use crate::{Error, Stream};

pub(crate) mod connector;

static IDENT: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn new() -> Self {
        Self(IDENT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection will be made, and how.
#[derive(Debug)]
pub(crate) struct Target {
    host: String,
    port: u16,
    tls: Option<TlsTarget>,
}

#[derive(Debug)]
struct TlsTarget {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl Target {
    pub(crate) fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: None,
        }
    }

    pub(crate) fn tls(
        host: impl Into<String>,
        port: u16,
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tls: Some(TlsTarget {
                config,
                server_name,
            }),
        }
    }

    async fn connect(self) -> io::Result<Stream> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;

        if let Ok(peer_addr) = tcp.peer_addr() {
            trace!(peer.addr = %peer_addr, "tcp connected");
        } else {
            trace!("tcp connected");
        }

        match self.tls {
            Some(tls) => {
                let stream = tokio_rustls::TlsConnector::from(tls.config)
                    .connect(tls.server_name, tcp)
                    .await?;
                trace!("tls handshake complete");
                Ok(stream.into())
            }
            None => Ok(tcp.into()),
        }
    }
}

#[derive(Debug)]
enum State {
    Created(Target),
    Connected(Stream),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Created(_) => "unconnected",
            State::Connected(_) => "connected",
            State::Closed => "closed",
        }
    }
}

/// A transport connection to an endpoint.
///
/// Connections are handed out by [`Pool::acquire`][crate::Pool::acquire], and
/// should be given back with [`Pool::release`][crate::Pool::release] once the
/// caller is done with them. A connection which is dropped instead is simply
/// closed.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    key: EndpointKey,
    hostname: String,
    tls: bool,
    usage: usize,
    state: State,
}

impl Connection {
    pub(crate) fn new(
        key: EndpointKey,
        hostname: impl Into<String>,
        tls: bool,
        target: Target,
    ) -> Self {
        let conn = Self {
            id: ConnectionId::new(),
            key,
            hostname: hostname.into(),
            tls,
            usage: 0,
            state: State::Created(target),
        };
        trace!(id = %conn.id, key = %conn.key, "creating connection");
        conn
    }

    /// Open the underlying transport: a TCP connection, followed by the TLS
    /// handshake for TLS targets.
    ///
    /// A connection can only be connected once. If connecting fails, the
    /// connection is closed.
    #[cfg_attr(
        not(tarpaulin),
        tracing::instrument(skip_all, fields(id = %self.id, key = %self.key), level = "debug")
    )]
    pub async fn connect(&mut self) -> Result<(), Error> {
        let target = match std::mem::replace(&mut self.state, State::Closed) {
            State::Created(target) => target,
            state => {
                let name = state.name();
                self.state = state;
                return Err(Error::InvalidState(name));
            }
        };

        let stream = target.connect().await?;
        self.state = State::Connected(stream);
        Ok(())
    }

    /// Close the underlying transport.
    ///
    /// Closing is best-effort: errors are logged and discarded. Closing a
    /// connection which is already closed does nothing.
    pub async fn close(&mut self) {
        if let State::Connected(mut stream) = std::mem::replace(&mut self.state, State::Closed) {
            if let Err(error) = stream.shutdown().await {
                debug!(id = %self.id, %error, "error closing connection");
            }
            trace!(id = %self.id, "connection closed");
        }
    }

    /// Identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The endpoint key which this connection is pooled under.
    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    /// The hostname this connection was requested for.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Whether TLS was requested for this connection.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Number of times this connection has been checked out.
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Returns `true` if the connection is connected and not closed.
    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    /// Returns `true` if the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// The underlying stream, if connected.
    pub fn stream(&self) -> Option<&Stream> {
        match &self.state {
            State::Connected(stream) => Some(stream),
            _ => None,
        }
    }

    /// Mutable access to the underlying stream, for request and response I/O.
    pub fn stream_mut(&mut self) -> Result<&mut Stream, Error> {
        match &mut self.state {
            State::Connected(stream) => Ok(stream),
            state => Err(Error::InvalidState(state.name())),
        }
    }

    /// Address of the remote peer, if connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream().and_then(|stream| stream.peer_addr().ok())
    }

    pub(crate) fn checkout(&mut self) {
        self.usage += 1;
    }
}

impl PoolableConnection for Connection {
    fn is_open(&self) -> bool {
        Connection::is_open(self)
    }
}
