//! Outbound transport: TCP with optional TLS.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde::Serialize;
use sha2::Digest;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Where an outbound connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub encrypted: bool,
}

impl Target {
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encrypted: false,
        }
    }

    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encrypted: true,
        }
    }
}

/// Negotiated TLS parameters and the server's leaf certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub protocol_version: String,
    pub cipher_suite: String,
    pub chain_length: usize,
    pub fingerprint_sha256: String,
}

/// An established outbound stream: plain or TLS-encrypted.
pub enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for NetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetStream::Plain(_) => f.write_str("NetStream::Plain(TcpStream)"),
            NetStream::Tls(_) => f.write_str("NetStream::Tls(TlsStream)"),
        }
    }
}

impl NetStream {
    fn tcp(&self) -> &TcpStream {
        match self {
            NetStream::Plain(stream) => stream,
            NetStream::Tls(stream) => stream.get_ref().0,
        }
    }

    /// The address actually connected to.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, NetStream::Tls(_))
    }

    /// TLS metadata of the server. `None` for plain TCP.
    pub fn certificate(&self) -> Option<CertificateInfo> {
        let NetStream::Tls(stream) = self else {
            return None;
        };
        let (_tcp, conn) = stream.get_ref();
        let chain = conn.peer_certificates().unwrap_or_default();
        let fingerprint = chain
            .first()
            .map(|leaf| {
                sha2::Sha256::digest(leaf.as_ref())
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<String>()
            })
            .unwrap_or_default();

        Some(CertificateInfo {
            protocol_version: conn
                .protocol_version()
                .map(|v| format!("{v:?}"))
                .unwrap_or_default(),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite()))
                .unwrap_or_default(),
            chain_length: chain.len(),
            fingerprint_sha256: fingerprint,
        })
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            NetStream::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            NetStream::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            NetStream::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            NetStream::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
        }
    }
}

/// The primitive connect capability shared by every outbound client.
#[async_trait]
pub trait Connect: Send + Sync {
    async fn connect(&self, target: &Target) -> io::Result<NetStream>;

    /// Whether this connector already emits audit records.
    fn is_audited(&self) -> bool {
        false
    }
}

#[async_trait]
impl<C: Connect + ?Sized> Connect for Arc<C> {
    async fn connect(&self, target: &Target) -> io::Result<NetStream> {
        (**self).connect(target).await
    }

    fn is_audited(&self) -> bool {
        (**self).is_audited()
    }
}

/// Real transport: tokio TCP, rustls for encrypted targets.
#[derive(Clone)]
pub struct Transport {
    tls: Arc<ClientConfig>,
}

impl Transport {
    /// Transport that verifies servers against the webpki root store.
    pub fn new() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::with_config(Arc::new(config))
    }

    pub fn with_config(tls: Arc<ClientConfig>) -> Self {
        Self { tls }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connect for Transport {
    async fn connect(&self, target: &Target) -> io::Result<NetStream> {
        let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
        if !target.encrypted {
            return Ok(NetStream::Plain(tcp));
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid hostname for TLS: {}", target.host),
            )
        })?;
        let stream = TlsConnector::from(Arc::clone(&self.tls))
            .connect(server_name, tcp)
            .await?;
        Ok(NetStream::Tls(Box::new(stream)))
    }
}
