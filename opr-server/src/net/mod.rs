//! Outbound network connections with audit logging.

pub mod audit;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{
    install, install_with_sink, AuditSink, AuditStage, Audited, ConnectAudit, ConnectionAuditRecord,
    TracingSink,
};
pub use transport::{CertificateInfo, Connect, NetStream, Target, Transport};
