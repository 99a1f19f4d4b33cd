//! Test-only utilities.
use crate::{events::EventBus, policy::TendermintPolicy, Application, Config, Timeouts};
use keel_roles::validator;
use keel_storage::SignRecordStore;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

/// Application keeping the committed blocks in memory. Payloads depend only
/// on the height, and the app hash after a block is the big-endian height.
#[derive(Debug, Default)]
pub struct InMemoryApplication {
    committed: Mutex<BTreeMap<validator::Height, validator::Block>>,
}

impl InMemoryApplication {
    /// Payload proposed at `height`.
    pub fn payload(height: validator::Height) -> validator::Payload {
        validator::Payload(format!("block {height}").into_bytes())
    }

    /// Committed blocks, by height.
    pub fn committed(&self) -> BTreeMap<validator::Height, validator::Block> {
        self.committed.lock().unwrap().clone()
    }
}

impl Application for InMemoryApplication {
    fn propose(&self, height: validator::Height) -> anyhow::Result<validator::Payload> {
        Ok(Self::payload(height))
    }

    fn verify(&self, height: validator::Height, payload: &validator::Payload) -> anyhow::Result<()> {
        anyhow::ensure!(
            *payload == Self::payload(height),
            "unexpected payload {payload:?} at height {height}"
        );
        Ok(())
    }

    fn commit(&self, block: &validator::Block) -> anyhow::Result<validator::AppHash> {
        let mut committed = self.committed.lock().unwrap();
        // Recovery commits the same blocks again.
        if let Some(old) = committed.get(&block.height) {
            anyhow::ensure!(old == block, "conflicting block at height {}", block.height);
        }
        committed.insert(block.height, block.clone());
        Ok(validator::AppHash(block.height.0.to_be_bytes().to_vec()))
    }
}

/// Config of a validator with `key`, with fresh events, the default
/// timeouts and the Tendermint policy.
pub fn make_config(
    genesis: validator::Genesis,
    key: validator::SecretKey,
    wal_path: PathBuf,
    store: impl SignRecordStore,
    app: Arc<dyn Application>,
) -> Config {
    Config {
        secret_key: key,
        genesis,
        wal_path,
        sign_record_store: Box::new(store),
        event_bus: Arc::new(EventBus::new()),
        application: app,
        timeouts: Timeouts::default(),
        policy: Box::new(TendermintPolicy),
    }
}
