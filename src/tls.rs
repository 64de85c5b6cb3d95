//! TLS trust configuration for client connections.
//!
//! The [`TlsContextProvider`] builds a [`TlsContext`] the first time a TLS
//! connection is needed, and hands out the same context for the lifetime of
//! the provider. The context is either verified (against a CA bundle, or the
//! platform's native roots) or unverified, in which case any certificate
//! presented by the server is accepted.
//!
//! When no rustls crypto provider is available, the context is built in a
//! degraded form which carries no client configuration. Connections then fall
//! back to [`default_tls_config`].

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::DebugLiteral;

/// Error building the TLS trust configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TlsError {
    /// The CA bundle could not be read.
    #[error("reading CA bundle {path}: {source}")]
    ReadCaBundle {
        /// Path to the CA bundle.
        path: Utf8PathBuf,

        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The CA bundle contained no certificates.
    #[error("no certificates found in CA bundle {0}")]
    EmptyCaBundle(Utf8PathBuf),

    /// A certificate was rejected by rustls.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    /// No crypto provider is installed or compiled in.
    #[error("no TLS crypto provider available")]
    NoCryptoProvider,
}

/// Cached TLS trust configuration.
pub struct TlsContext {
    verified: bool,
    ca_bundle: Option<Utf8PathBuf>,
    client_config: Option<Arc<ClientConfig>>,
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("verified", &self.verified)
            .field("ca_bundle", &self.ca_bundle)
            .field(
                "client_config",
                &DebugLiteral(if self.client_config.is_some() {
                    "Some(..)"
                } else {
                    "None"
                }),
            )
            .finish()
    }
}

impl TlsContext {
    /// Build the context described by the certificate settings in `config`.
    pub fn build(config: &Config) -> Result<Self, TlsError> {
        let ca_bundle = config.ca_bundle();
        debug!(ca_bundle = ?ca_bundle, verify = config.check_ssl_certificate, "building TLS context");

        if config.check_ssl_certificate {
            Self::verified(ca_bundle)
        } else {
            Ok(Self::unverified())
        }
    }

    /// A context which verifies server certificates against the given CA
    /// bundle, or against the platform's native roots when no bundle is given.
    pub fn verified(ca_bundle: Option<Utf8PathBuf>) -> Result<Self, TlsError> {
        let Some(provider) = crypto_provider() else {
            warn!("no crypto provider available, TLS context is degraded");
            return Ok(Self::degraded(true, ca_bundle));
        };

        let builder = match ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
        {
            Ok(builder) => builder,
            Err(error) => {
                warn!(%error, "crypto provider does not support safe defaults, TLS context is degraded");
                return Ok(Self::degraded(true, ca_bundle));
            }
        };

        let roots = match ca_bundle.as_deref() {
            Some(path) => load_ca_bundle(path)?,
            None => native_roots(),
        };

        let mut config = builder
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols.push(b"http/1.1".to_vec());

        Ok(Self {
            verified: true,
            ca_bundle,
            client_config: Some(Arc::new(config)),
        })
    }

    /// A context which accepts any server certificate, for any hostname.
    ///
    /// Handshake signatures are still checked, so the server must hold the
    /// private key for the certificate it presents.
    pub fn unverified() -> Self {
        let Some(provider) = crypto_provider() else {
            warn!("no crypto provider available, TLS context is degraded");
            return Self::degraded(false, None);
        };

        let builder = match ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
        {
            Ok(builder) => builder,
            Err(error) => {
                warn!(%error, "crypto provider does not support safe defaults, TLS context is degraded");
                return Self::degraded(false, None);
            }
        };

        let mut config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier::new(provider)))
            .with_no_client_auth();
        config.alpn_protocols.push(b"http/1.1".to_vec());

        Self {
            verified: false,
            ca_bundle: None,
            client_config: Some(Arc::new(config)),
        }
    }

    pub(crate) fn degraded(verified: bool, ca_bundle: Option<Utf8PathBuf>) -> Self {
        Self {
            verified,
            ca_bundle,
            client_config: None,
        }
    }

    /// Whether server certificates are verified.
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// The CA bundle used for verification, if any.
    pub fn ca_bundle(&self) -> Option<&Utf8Path> {
        self.ca_bundle.as_deref()
    }

    /// The client configuration, or `None` if the context is degraded.
    pub fn client_config(&self) -> Option<&Arc<ClientConfig>> {
        self.client_config.as_ref()
    }

    /// Returns `true` if no usable client configuration could be built.
    pub fn is_degraded(&self) -> bool {
        self.client_config.is_none()
    }
}

/// Builds a [`TlsContext`] once, and returns the same context thereafter.
///
/// The configuration passed to the first successful call to
/// [`TlsContextProvider::context`] decides the context; later calls ignore
/// their configuration argument.
#[derive(Debug, Default)]
pub struct TlsContextProvider {
    context: Mutex<Option<Arc<TlsContext>>>,
}

impl TlsContextProvider {
    /// Create a provider which has not yet built a context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached context, building it from `config` on first use.
    ///
    /// Concurrent first callers are serialized, so only one context is ever built.
    /// A failed build is not cached.
    pub fn context(&self, config: &Config) -> Result<Arc<TlsContext>, TlsError> {
        let mut cached = self.context.lock();
        if let Some(context) = cached.as_ref() {
            trace!("using cached TLS context");
            return Ok(context.clone());
        }

        let context = Arc::new(TlsContext::build(config)?);
        *cached = Some(context.clone());
        Ok(context)
    }

    /// The cached context, if one has been built.
    pub fn get(&self) -> Option<Arc<TlsContext>> {
        self.context.lock().clone()
    }
}

/// The library-default client configuration: native roots, with the
/// available crypto provider.
pub fn default_tls_config() -> Result<ClientConfig, TlsError> {
    let provider = crypto_provider().ok_or(TlsError::NoCryptoProvider)?;

    let mut cfg = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(native_roots())
        .with_no_client_auth();

    cfg.alpn_protocols.push(b"http/1.1".to_vec());
    Ok(cfg)
}

/// The process-wide default crypto provider, or the provider selected at
/// compile time through the `tls-ring` or `tls-aws-lc` features.
fn crypto_provider() -> Option<Arc<CryptoProvider>> {
    if let Some(provider) = CryptoProvider::get_default() {
        return Some(provider.clone());
    }

    #[cfg(feature = "tls-ring")]
    let provider = Some(rustls::crypto::ring::default_provider());

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(rustls::crypto::aws_lc_rs::default_provider());

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider: Option<CryptoProvider> = None;

    provider.map(Arc::new)
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let result = rustls_native_certs::load_native_certs();
    for error in &result.errors {
        warn!(%error, "error loading native certificates");
    }

    let (added, ignored) = roots.add_parsable_certificates(result.certs);
    trace!(added, ignored, "loaded native root certificates");
    roots
}

fn load_ca_bundle(path: &Utf8Path) -> Result<RootCertStore, TlsError> {
    let read_error = |source| TlsError::ReadCaBundle {
        path: path.to_owned(),
        source,
    };

    let file = File::open(path).map_err(read_error)?;
    let mut reader = BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.map_err(read_error)?)?;
    }

    if roots.is_empty() {
        return Err(TlsError::EmptyCaBundle(path.to_owned()));
    }

    trace!(path = %path, count = roots.len(), "loaded CA bundle");
    Ok(roots)
}

/// Certificate verifier which accepts every certificate.
#[derive(Debug)]
struct NoVerifier {
    provider: Arc<CryptoProvider>,
}

impl NoVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
