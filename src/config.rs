//! Client configuration consumed by the connection pool.
//!
//! The [`Config`] type carries the settings which decide where a connection is
//! made (directly, or through a forward proxy), which transport is used when the
//! caller doesn't ask for one, and how the TLS trust configuration is built.
//!
//! Routing settings are read on every [`Pool::acquire`][crate::Pool::acquire], so
//! changes made with [`Pool::update_config`][crate::Pool::update_config] apply
//! to the next checkout. The TLS settings are only read once, when the first
//! TLS connection is built.

use camino::Utf8PathBuf;

/// Default port for a forward proxy when none is configured.
pub const DEFAULT_PROXY_PORT: u16 = 3128;

/// Configuration for connections made by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// Use HTTPS when the caller does not specify a transport.
    pub use_https: bool,

    /// Hostname of a forward proxy. Empty means no proxy.
    pub proxy_host: String,

    /// Port of the forward proxy.
    pub proxy_port: u16,

    /// Verify the server's certificate chain and hostname.
    pub check_ssl_certificate: bool,

    /// Path to a PEM bundle of CA certificates. Empty means the
    /// platform's native trust store.
    pub ca_certs_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_https: true,
            proxy_host: String::new(),
            proxy_port: DEFAULT_PROXY_PORT,
            check_ssl_certificate: true,
            ca_certs_file: String::new(),
        }
    }
}

impl Config {
    /// Set the default transport preference.
    pub fn with_https(mut self, use_https: bool) -> Self {
        self.use_https = use_https;
        self
    }

    /// Route all connections through the given forward proxy.
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = host.into();
        self.proxy_port = port;
        self
    }

    /// Connect directly, without a proxy.
    pub fn without_proxy(mut self) -> Self {
        self.proxy_host.clear();
        self.proxy_port = DEFAULT_PROXY_PORT;
        self
    }

    /// Enable or disable server certificate verification.
    pub fn with_certificate_check(mut self, check: bool) -> Self {
        self.check_ssl_certificate = check;
        self
    }

    /// Use the CA certificates in the given PEM bundle.
    pub fn with_ca_certs_file(mut self, path: impl Into<String>) -> Self {
        self.ca_certs_file = path.into();
        self
    }

    /// The configured proxy as a `(host, port)` pair, if any.
    pub fn proxy(&self) -> Option<(&str, u16)> {
        if self.proxy_host.is_empty() {
            None
        } else {
            Some((self.proxy_host.as_str(), self.proxy_port))
        }
    }

    /// The CA bundle path, or `None` when the native trust store should be used.
    pub fn ca_bundle(&self) -> Option<Utf8PathBuf> {
        if self.ca_certs_file.is_empty() {
            None
        } else {
            Some(Utf8PathBuf::from(&self.ca_certs_file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.use_https);
        assert!(config.check_ssl_certificate);
        assert_eq!(config.proxy(), None);
        assert_eq!(config.ca_bundle(), None);
    }

    #[test]
    fn proxy() {
        let config = Config::default().with_proxy("squid.internal", 8080);
        assert_eq!(config.proxy(), Some(("squid.internal", 8080)));

        let config = config.without_proxy();
        assert_eq!(config.proxy(), None);
        assert_eq!(config.proxy_port, DEFAULT_PROXY_PORT);
    }

    #[test]
    fn ca_bundle() {
        let config = Config::default().with_ca_certs_file("/etc/ssl/bundle.pem");
        assert_eq!(
            config.ca_bundle(),
            Some(Utf8PathBuf::from("/etc/ssl/bundle.pem"))
        );
    }
}
