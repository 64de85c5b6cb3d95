use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use stevedore::{Config, Connection, EndpointKey, Error, Pool, PoolConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);

        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Write the CA certificate to a PEM bundle.
    fn bundle(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(self.cert.pem().as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn server_config(&self) -> ServerConfig {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_owned()])
            .unwrap()
            .signed_by(&key, &self.cert, &self.key)
            .unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));

        let mut cfg = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.der().clone()], key)
        .unwrap();

        cfg.alpn_protocols.push(b"http/1.1".to_vec());
        cfg
    }
}

/// A TLS echo server for `localhost`, with a certificate issued by `ca`.
async fn echo_server(ca: &Authority) -> SocketAddr {
    let acceptor = TlsAcceptor::from(Arc::new(ca.server_config()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let stream = match acceptor.accept(socket).await {
                    Ok(stream) => stream,
                    Err(error) => {
                        tracing::trace!(%error, "handshake failed");
                        return;
                    }
                };

                let (mut reader, mut writer) = tokio::io::split(stream);
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

fn hostname(addr: SocketAddr) -> String {
    format!("localhost:{}", addr.port())
}

async fn ping(conn: &mut Connection) -> Result<(), BoxError> {
    let stream = conn.stream_mut()?;
    stream.write_all(b"ping").await?;

    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    assert_eq!(&buf, b"ping");
    Ok(())
}

#[tokio::test]
async fn verified_connection_is_reused() -> Result<(), BoxError> {
    let _ = tracing_subscriber::fmt::try_init();

    let ca = Authority::new("stevedore test CA");
    let bundle = ca.bundle();
    let addr = echo_server(&ca).await;

    let config = Config::default().with_ca_certs_file(bundle.path().to_str().unwrap());
    let pool = Pool::new(config, PoolConfig::default());

    let mut conn = pool.acquire(&hostname(addr), Some(true)).await?;
    assert!(conn.is_tls());
    assert!(conn.stream().unwrap().is_tls());
    assert_eq!(conn.key().to_string(), format!("https://{}", hostname(addr)));
    ping(&mut conn).await?;

    let id = conn.id();
    pool.release(conn).await;

    let key = EndpointKey::resolve(&hostname(addr), true, &pool.config())?;
    assert_eq!(pool.idle_count(&key), 1);

    let mut conn = pool.acquire(&hostname(addr), None).await?;
    assert_eq!(conn.id(), id);
    assert_eq!(conn.usage(), 2);
    ping(&mut conn).await?;

    let context = pool.tls_context().expect("context is built on first TLS connection");
    assert!(context.is_verified());
    assert!(!context.is_degraded());
    assert_eq!(
        context.ca_bundle().map(|path| path.as_std_path()),
        Some(bundle.path())
    );
    Ok(())
}

#[tokio::test]
async fn unverified_connection() -> Result<(), BoxError> {
    let ca = Authority::new("untrusted CA");
    let addr = echo_server(&ca).await;

    let pool = Pool::new(
        Config::default().with_certificate_check(false),
        PoolConfig::default(),
    );

    let mut conn = pool.acquire(&hostname(addr), Some(true)).await?;
    ping(&mut conn).await?;
    pool.release(conn).await;

    let context = pool.tls_context().unwrap();
    assert!(!context.is_verified());
    assert!(context.ca_bundle().is_none());
    Ok(())
}

#[tokio::test]
async fn untrusted_certificate_is_rejected() -> Result<(), BoxError> {
    let server_ca = Authority::new("server CA");
    let other_ca = Authority::new("other CA");
    let bundle = other_ca.bundle();
    let addr = echo_server(&server_ca).await;

    let config = Config::default().with_ca_certs_file(bundle.path().to_str().unwrap());
    let pool = Pool::new(config, PoolConfig::default());

    let error = pool.acquire(&hostname(addr), Some(true)).await.unwrap_err();
    assert!(matches!(error, Error::Transport(_)), "got {error:?}");

    let key = EndpointKey::resolve(&hostname(addr), true, &pool.config())?;
    assert_eq!(pool.idle_count(&key), 0);
    Ok(())
}

#[tokio::test]
async fn missing_ca_bundle() {
    let pool = Pool::new(
        Config::default().with_ca_certs_file("/nonexistent/stevedore/ca.pem"),
        PoolConfig::default(),
    );

    let error = pool.acquire("localhost:443", Some(true)).await.unwrap_err();
    assert!(matches!(error, Error::Tls(_)), "got {error:?}");
    assert!(pool.tls_context().is_none(), "failed builds are not cached");
}

#[tokio::test]
async fn tls_context_is_built_once() -> Result<(), BoxError> {
    let ca = Authority::new("stevedore test CA");
    let bundle = ca.bundle();
    let addr = echo_server(&ca).await;

    let config = Config::default().with_ca_certs_file(bundle.path().to_str().unwrap());
    let pool = Pool::new(config, PoolConfig::default());

    let conn = pool.acquire(&hostname(addr), Some(true)).await?;
    let context = pool.tls_context().unwrap();

    // Later certificate settings are ignored once the context exists.
    pool.update_config(|config| {
        config.check_ssl_certificate = false;
        config.ca_certs_file.clear();
    });

    let second = pool.acquire(&hostname(addr), Some(true)).await?;
    assert_ne!(conn.id(), second.id());
    assert!(Arc::ptr_eq(&context, &pool.tls_context().unwrap()));
    assert!(pool.tls_context().unwrap().is_verified());
    Ok(())
}
