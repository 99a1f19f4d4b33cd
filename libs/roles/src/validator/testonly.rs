//! Test-only utilities.
use super::{
    AppHash, Block, BlockId, ChainId, Committee, Genesis, Height, Payload, SecretKey,
    WeightedValidator,
};
use keel_crypto::ByteFmt as _;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

/// Test setup: a genesis with its validators' keys.
#[derive(Debug, Clone)]
pub struct Setup {
    /// Validators' secret keys, in committee order.
    pub validator_keys: Vec<SecretKey>,
    /// Genesis config.
    pub genesis: Genesis,
}

impl Setup {
    /// New `Setup` with `validators` validators of weight 1.
    pub fn new(rng: &mut impl Rng, validators: usize) -> Self {
        Self::new_with_weights(rng, vec![1; validators])
    }

    /// New `Setup` with validators of the given weights.
    pub fn new_with_weights(rng: &mut impl Rng, weights: Vec<u64>) -> Self {
        let keys: Vec<(SecretKey, u64)> = weights.into_iter().map(|w| (rng.gen(), w)).collect();
        let committee = Committee::new(keys.iter().map(|(k, w)| WeightedValidator {
            key: k.public(),
            weight: *w,
        }))
        .unwrap();
        let mut validator_keys: Vec<_> = keys.into_iter().map(|(k, _)| k).collect();
        validator_keys.sort_by_key(|k| committee.index(&k.public().address()));
        Self {
            validator_keys,
            genesis: Genesis {
                chain_id: ChainId("keel-test-chain".to_owned()),
                initial_height: Height(1),
                committee,
            },
        }
    }

    /// Block at the given height with the given payload, on top of `last_block_id`.
    pub fn make_block(
        &self,
        height: Height,
        last_block_id: Option<BlockId>,
        app_hash: AppHash,
        payload: Payload,
    ) -> Block {
        Block {
            chain_id: self.genesis.chain_id.clone(),
            height,
            last_block_id,
            app_hash,
            payload,
        }
    }
}

impl Distribution<SecretKey> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SecretKey {
        SecretKey::decode(&rng.gen::<[u8; 32]>()).unwrap()
    }
}

impl Distribution<Payload> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Payload {
        let size: usize = rng.gen_range(1..1000);
        Payload((0..size).map(|_| rng.gen()).collect())
    }
}
