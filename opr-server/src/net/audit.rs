//! Audit logging around outbound connects.
//!
//! Before connecting, the addresses the host name resolves to are recorded
//! (names often resolve differently inside a VPC than outside). After a
//! successful connect, the actual peer address and, for TLS, the certificate
//! metadata are recorded. A failed connect records nothing after the fact.
//!
//! [`Audited`] wraps any [`Connect`] implementation. Clients that open their
//! own sockets, like the Postgres driver, drive a [`ConnectAudit`] directly.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::transport::{CertificateInfo, Connect, NetStream, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStage {
    Resolved,
    Connected,
}

/// One audit entry produced around a connect attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAuditRecord {
    pub stage: AuditStage,
    pub host: String,
    pub port: u16,
    pub resolved: Vec<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateInfo>,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &ConnectionAuditRecord);
}

/// Writes audit records as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, record: &ConnectionAuditRecord) {
        match record.stage {
            AuditStage::Resolved => tracing::info!(
                host = %record.host,
                port = record.port,
                addresses = ?record.resolved,
                "getaddrinfo"
            ),
            AuditStage::Connected => {
                let cert = record.certificate.as_ref();
                tracing::info!(
                    host = %record.host,
                    port = record.port,
                    peer = ?record.peer,
                    tls_version = cert.map(|c| c.protocol_version.as_str()),
                    cipher_suite = cert.map(|c| c.cipher_suite.as_str()),
                    chain_length = cert.map(|c| c.chain_length as u64),
                    fingerprint_sha256 = cert.map(|c| c.fingerprint_sha256.as_str()),
                    "connected"
                )
            }
        }
    }
}

/// The records of one connect attempt: addresses first, peer once connected.
pub struct ConnectAudit {
    sink: Arc<dyn AuditSink>,
    host: String,
    port: u16,
    resolved: Vec<SocketAddr>,
}

impl ConnectAudit {
    /// Resolve `host` and record the candidate addresses.
    ///
    /// A failed lookup is logged and recorded as an empty list; the connect
    /// itself reports the real failure.
    pub async fn resolve(sink: Arc<dyn AuditSink>, host: &str, port: u16) -> Self {
        let resolved: Vec<SocketAddr> = match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => addrs.collect(),
            Err(err) => {
                tracing::warn!(host, port, error = %err, "getaddrinfo failed");
                Vec::new()
            }
        };

        sink.record(&ConnectionAuditRecord {
            stage: AuditStage::Resolved,
            host: host.to_owned(),
            port,
            resolved: resolved.clone(),
            peer: None,
            certificate: None,
        });

        Self {
            sink,
            host: host.to_owned(),
            port,
            resolved,
        }
    }

    /// Record the established connection.
    pub fn connected(self, peer: Option<SocketAddr>, certificate: Option<CertificateInfo>) {
        self.sink.record(&ConnectionAuditRecord {
            stage: AuditStage::Connected,
            host: self.host,
            port: self.port,
            resolved: self.resolved,
            peer,
            certificate,
        });
    }
}

/// Connector decorator that audits every connect of the wrapped connector.
pub struct Audited<C> {
    inner: C,
    sink: Arc<dyn AuditSink>,
}

impl<C: Connect> Audited<C> {
    pub fn new(inner: C, sink: Arc<dyn AuditSink>) -> Self {
        Self { inner, sink }
    }
}

#[async_trait]
impl<C: Connect> Connect for Audited<C> {
    async fn connect(&self, target: &Target) -> io::Result<NetStream> {
        let audit = ConnectAudit::resolve(Arc::clone(&self.sink), &target.host, target.port).await;
        let stream = self.inner.connect(target).await?;
        audit.connected(stream.peer_addr().ok(), stream.certificate());
        Ok(stream)
    }

    fn is_audited(&self) -> bool {
        true
    }
}

/// Wrap `connector` so every connect is audited through the tracing sink.
///
/// Installing over an already audited connector returns it unchanged.
pub fn install(connector: Arc<dyn Connect>) -> Arc<dyn Connect> {
    install_with_sink(connector, Arc::new(TracingSink))
}

pub fn install_with_sink(connector: Arc<dyn Connect>, sink: Arc<dyn AuditSink>) -> Arc<dyn Connect> {
    if connector.is_audited() {
        tracing::debug!("network audit already installed");
        return connector;
    }
    Arc::new(Audited::new(connector, sink))
}
