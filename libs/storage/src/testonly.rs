//! Test-only utilities.
use crate::{SignRecordStore, SigningRecord};
use std::sync::{Arc, Mutex};

/// In-memory signing record. Clones share the record, so a test can keep a
/// handle to the store it passed to a node and inspect or preset it.
#[derive(Debug, Clone, Default)]
pub struct InMemorySignRecordStore(Arc<Mutex<SigningRecord>>);

impl InMemorySignRecordStore {
    /// Store holding the given record.
    pub fn new(record: SigningRecord) -> Self {
        Self(Arc::new(Mutex::new(record)))
    }

    /// Current record.
    pub fn record(&self) -> SigningRecord {
        self.0.lock().unwrap().clone()
    }
}

impl SignRecordStore for InMemorySignRecordStore {
    fn load(&self) -> anyhow::Result<SigningRecord> {
        Ok(self.record())
    }

    fn persist(&self, record: &SigningRecord) -> anyhow::Result<()> {
        *self.0.lock().unwrap() = record.clone();
        Ok(())
    }
}
