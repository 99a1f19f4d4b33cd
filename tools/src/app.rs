//! Application executed by the node binary.
use keel_bft::Application;
use keel_crypto::sha256::Sha256;
use keel_roles::validator;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    last_height: Option<validator::Height>,
    app_hash: validator::AppHash,
}

/// Application which only chains the payloads of committed blocks:
/// `app_hash' = sha256(app_hash || payload)`.
///
/// Every validator proposes the same payload for a height, and the state
/// lives in memory, so a restarted node rebuilds it while the WAL replays.
#[derive(Debug, Default)]
pub struct HashChainApp(Mutex<State>);

impl HashChainApp {
    /// Height of the last committed block.
    pub fn last_height(&self) -> Option<validator::Height> {
        self.0.lock().ok().and_then(|s| s.last_height)
    }
}

impl Application for HashChainApp {
    fn propose(&self, height: validator::Height) -> anyhow::Result<validator::Payload> {
        Ok(validator::Payload(format!("keel block {height}").into_bytes()))
    }

    fn verify(&self, height: validator::Height, payload: &validator::Payload) -> anyhow::Result<()> {
        anyhow::ensure!(
            *payload == self.propose(height)?,
            "unexpected payload at height {height}"
        );
        Ok(())
    }

    fn commit(&self, block: &validator::Block) -> anyhow::Result<validator::AppHash> {
        let mut state = self
            .0
            .lock()
            .map_err(|_| anyhow::format_err!("application state poisoned"))?;
        if let Some(last) = state.last_height {
            anyhow::ensure!(
                block.height == last.next(),
                "block {} committed after block {last}",
                block.height
            );
        }
        anyhow::ensure!(
            block.app_hash == state.app_hash,
            "block {} built on app hash {:?}, application is at {:?}",
            block.height,
            block.app_hash,
            state.app_hash
        );
        let mut data = state.app_hash.0.clone();
        data.extend_from_slice(&block.payload.0);
        let app_hash = validator::AppHash(Sha256::new(&data).as_bytes().to_vec());
        state.last_height = Some(block.height);
        state.app_hash = app_hash.clone();
        tracing::debug!(height = %block.height, ?app_hash, "applied block");
        Ok(app_hash)
    }
}
