//! Audit sink that keeps records in memory for assertions.

use parking_lot::Mutex;

use super::audit::{AuditSink, AuditStage, ConnectionAuditRecord};

#[derive(Default)]
pub(crate) struct RecordingSink {
    records: Mutex<Vec<ConnectionAuditRecord>>,
}

impl RecordingSink {
    pub(crate) fn records(&self) -> Vec<ConnectionAuditRecord> {
        self.records.lock().clone()
    }

    pub(crate) fn count(&self, stage: AuditStage) -> usize {
        self.records.lock().iter().filter(|r| r.stage == stage).count()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, record: &ConnectionAuditRecord) {
        self.records.lock().push(record.clone());
    }
}
