//! Connection Pooling for Clients
//!
//! The `pool` module provides a pool of idle transport connections, keyed by the
//! endpoint they connect to. Callers check a connection out with [`Pool::acquire`],
//! use the underlying stream for one or more request/response exchanges, and give
//! it back with [`Pool::release`].
//!
//! Idle connections for an endpoint form a stack: the most recently released
//! connection is re-used first. Connections are retired (closed instead of
//! pooled) once they have been checked out [`Config::max_uses`] times, and
//! connections through a forward proxy are never pooled at all.
//!
//! Pool configuration happens in the [`Config`] type, which sets the retirement
//! threshold and an optional idle timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

mod idle;
mod key;
#[cfg(test)]
mod mock;

use self::idle::IdleConnections;
pub use self::key::{EndpointKey, KeyError};

use crate::conn::{connector, Connection};
use crate::tls::{TlsContext, TlsContextProvider};
use crate::Error;

/// Default number of checkouts after which a connection is retired.
///
/// Object-storage services close long-lived connections on their own,
/// so connections are not re-used indefinitely.
pub const DEFAULT_MAX_USES: usize = 800;

/// A pool of connections to remote hosts.
///
/// Cloning a pool is cheap, and clones share the same idle connections, client
/// configuration and TLS context.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<Mutex<PoolInner<Connection>>>,
    config: Arc<RwLock<crate::Config>>,
    tls: Arc<TlsContextProvider>,
}

impl Pool {
    /// Create an empty pool.
    pub fn new(config: crate::Config, pool: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner::new(pool))),
            config: Arc::new(RwLock::new(config)),
            tls: Arc::new(TlsContextProvider::new()),
        }
    }

    /// A copy of the current client configuration.
    pub fn config(&self) -> crate::Config {
        self.config.read().clone()
    }

    /// Modify the client configuration.
    ///
    /// Proxy and transport settings apply to the next [`Pool::acquire`]. TLS
    /// settings are ignored once the TLS context has been built.
    pub fn update_config<F>(&self, f: F)
    where
        F: FnOnce(&mut crate::Config),
    {
        f(&mut self.config.write());
    }

    /// The pool configuration.
    pub fn pool_config(&self) -> Config {
        self.inner.lock().config.clone()
    }

    /// The TLS context, if a TLS connection has been built.
    pub fn tls_context(&self) -> Option<Arc<TlsContext>> {
        self.tls.get()
    }

    /// Number of idle connections pooled under `key`.
    pub fn idle_count(&self, key: &EndpointKey) -> usize {
        self.inner.lock().idle.get(key).map_or(0, |idle| idle.len())
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(crate::Config::default(), Config::default())
    }
}

impl Pool {
    /// Check out a connection to `hostname`.
    ///
    /// When `tls` is `None`, the transport is chosen by [`crate::Config::use_https`].
    ///
    /// An idle connection for the same endpoint is returned when one is available,
    /// without any network I/O. Otherwise a new connection is built and connected;
    /// the pool lock is not held while connecting, so a slow handshake never holds
    /// up other callers.
    ///
    /// Requesting TLS while a proxy is configured fails with
    /// [`Error::TlsThroughProxy`] before any pool lookup or connection attempt.
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip(self), level = "debug"))]
    pub async fn acquire(&self, hostname: &str, tls: Option<bool>) -> Result<Connection, Error> {
        let config = self.config();
        let tls = tls.unwrap_or(config.use_https);
        let key = EndpointKey::resolve(hostname, tls, &config)?;

        let idle = self.inner.lock().pop(&key);

        let mut conn = match idle {
            Some(conn) => {
                debug!(id = %conn.id(), %key, usage = conn.usage(), "re-using connection");
                conn
            }
            None => {
                debug!(%key, "creating new connection");
                let mut conn = connector::create(key, hostname, tls, &config, &self.tls)?;
                conn.connect().await?;
                conn
            }
        };

        conn.checkout();
        Ok(conn)
    }

    /// Return a connection to the pool.
    ///
    /// Proxy connections, connections which have already been closed, and
    /// connections which have reached [`Config::max_uses`] are closed and dropped.
    /// Every other connection is pooled for re-use.
    pub async fn release(&self, mut conn: Connection) {
        if conn.key().is_proxy() {
            conn.close().await;
            debug!(id = %conn.id(), "closing proxy connection (keep-alive not supported)");
            return;
        }

        if !conn.is_open() {
            trace!(id = %conn.id(), "dropping closed connection");
            return;
        }

        let (id, usage) = (conn.id(), conn.usage());
        let retired = {
            let mut inner = self.inner.lock();
            if usage >= inner.config.max_uses {
                Some(conn)
            } else {
                inner.push(conn.key().clone(), conn);
                None
            }
        };

        match retired {
            Some(mut conn) => {
                conn.close().await;
                debug!(%id, usage, "closing over-used connection");
            }
            None => debug!(%id, usage, "connection put back to pool"),
        }
    }

    /// Close every idle connection in the pool.
    pub async fn close_idle(&self) {
        let idle = self.inner.lock().drain();
        debug!(count = idle.len(), "closing idle connections");

        for mut conn in idle {
            conn.close().await;
        }
    }
}

#[derive(Debug)]
struct PoolInner<C>
where
    C: PoolableConnection,
{
    config: Config,
    idle: HashMap<EndpointKey, IdleConnections<C>>,
}

impl<C> PoolInner<C>
where
    C: PoolableConnection,
{
    fn new(config: Config) -> Self {
        Self {
            config,
            idle: HashMap::new(),
        }
    }

    fn push(&mut self, key: EndpointKey, connection: C) {
        self.idle.entry(key).or_default().push(connection);
    }

    fn pop(&mut self, key: &EndpointKey) -> Option<C> {
        let mut empty = false;
        let mut idle_entry = None;

        trace!(%key, "pop");

        if let Some(idle) = self.idle.get_mut(key) {
            idle_entry = idle.pop(self.config.idle_timeout);
            empty = idle.is_empty();
        }

        if empty {
            trace!(%key, "removing empty idle list");
            self.idle.remove(key);
        }

        idle_entry
    }

    fn drain(&mut self) -> Vec<C> {
        let mut connections = Vec::new();
        for (_, mut idle) in self.idle.drain() {
            connections.extend(idle.drain());
        }
        connections
    }
}

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Number of checkouts after which a connection is closed instead of
    /// being returned to the pool.
    pub max_uses: usize,

    /// The maximum idle duration of a connection. `None` keeps idle
    /// connections indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_uses: DEFAULT_MAX_USES,
            idle_timeout: None,
        }
    }
}

impl Config {
    /// Set the retirement threshold.
    pub fn with_max_uses(mut self, max_uses: usize) -> Self {
        self.max_uses = max_uses;
        self
    }

    /// Discard connections which have been idle for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}

/// A connection that can be pooled.
///
/// Connections must report to the pool whether they remain open, so that
/// closed connections are never handed out again.
pub trait PoolableConnection: Unpin + Send + Sized + 'static {
    /// Returns `true` if the connection is open.
    fn is_open(&self) -> bool;
}
