//! Stevedore
//!
//! Connection pooling for clients which talk to object-storage endpoints over
//! HTTP or HTTPS, optionally through a forward proxy.
//!
//! A [`Pool`] hands out transport-level [`Connection`]s keyed by endpoint, and
//! takes them back once a request/response exchange is complete. Idle connections
//! are re-used most-recently-released first, and connections are retired after a
//! fixed number of uses, since object-storage services close long-lived connections
//! on their own schedule.
//!
//! Request framing and response parsing are left to the caller, which reads and
//! writes the raw [`Stream`] on a checked-out connection.
//!
//! # Example
//! ```no_run
//! # use stevedore::{Config, Pool, PoolConfig};
//! # async fn run() -> Result<(), stevedore::Error> {
//! use tokio::io::AsyncWriteExt as _;
//!
//! let pool = Pool::new(Config::default().with_https(false), PoolConfig::default());
//!
//! let mut conn = pool.acquire("example.com", None).await?;
//! conn.stream_mut()?.write_all(b"HEAD / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//! pool.release(conn).await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::fmt;

pub mod config;
pub mod conn;
mod error;
pub mod pool;
pub mod stream;
pub mod tls;

pub use self::config::Config;
pub use self::conn::Connection;
pub use self::error::Error;
pub use self::pool::{Config as PoolConfig, EndpointKey, Pool};
pub use self::stream::Stream;

pub(crate) struct DebugLiteral<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DebugLiteral<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};

    /// A freshly generated, self-signed CA certificate in PEM form.
    pub(crate) fn ca_pem() -> String {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "stevedore test CA");

        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }
}
