use super::{ChainId, Committee, Height};

/// Chain parameters fixed at genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    /// Chain id.
    pub chain_id: ChainId,
    /// Height of the first block.
    pub initial_height: Height,
    /// Validators.
    pub committee: Committee,
}

impl Genesis {
    /// Verifies the genesis parameters.
    pub fn verify(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.chain_id.0.is_empty(), "empty chain id");
        anyhow::ensure!(self.initial_height.0 > 0, "initial height has to be positive");
        Ok(())
    }
}
