//! Validator committee.
use super::{Height, Round};
use crate::validator::{Address, PublicKey};
use anyhow::Context as _;
use std::collections::BTreeMap;

/// Committee member together with its voting power.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightedValidator {
    /// Validator key.
    pub key: PublicKey,
    /// Voting power.
    pub weight: u64,
}

/// A set of validators, ordered by address. The committee is fixed for the
/// lifetime of the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    vec: Vec<WeightedValidator>,
    indexes: BTreeMap<Address, usize>,
    total_weight: u64,
}

impl Committee {
    /// Creates a new Committee. Note that the order of the given validators
    /// is NOT preserved in the committee.
    pub fn new(validators: impl IntoIterator<Item = WeightedValidator>) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_weight: u64 = 0;
        for v in validators {
            let addr = v.key.address();
            anyhow::ensure!(
                !map.contains_key(&addr),
                "Duplicate validator in validator Committee"
            );
            anyhow::ensure!(v.weight > 0, "Validator weight has to be a positive value");
            total_weight = total_weight
                .checked_add(v.weight)
                .context("Sum of weights overflows in validator Committee")?;
            map.insert(addr, v);
        }
        anyhow::ensure!(
            !map.is_empty(),
            "Validator Committee must contain at least one validator"
        );
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec
                .iter()
                .enumerate()
                .map(|(i, v)| (v.key.address(), i))
                .collect(),
            vec,
            total_weight,
        })
    }

    /// Iterates over validators.
    pub fn iter(&self) -> impl Iterator<Item = &WeightedValidator> {
        self.vec.iter()
    }

    /// Returns the number of validators.
    #[allow(clippy::len_without_is_empty)] // a valid `Committee` is always non-empty by construction
    pub fn len(&self) -> usize {
        self.vec.len()
    }

    /// Get validator by its index in the committee.
    pub fn get(&self, index: usize) -> Option<&WeightedValidator> {
        self.vec.get(index)
    }

    /// Get the index of a validator in the committee.
    pub fn index(&self, address: &Address) -> Option<usize> {
        self.indexes.get(address).copied()
    }

    /// Returns true if the given validator is in the committee.
    pub fn contains(&self, address: &Address) -> bool {
        self.indexes.contains_key(address)
    }

    /// Sum of all voting powers.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Minimal weight strictly above 2/3 of the total.
    pub fn quorum_threshold(&self) -> u64 {
        // `total_weight * 2` may not fit in u64, the result always does.
        let q = u128::from(self.total_weight) * 2 / 3 + 1;
        u64::try_from(q).unwrap_or(u64::MAX)
    }

    /// Proposer of the given round: round-robin over `(height + round)`.
    pub fn proposer(&self, height: Height, round: Round) -> &WeightedValidator {
        let n = self.vec.len() as u64;
        let round = u64::try_from(round.0).unwrap_or(0);
        &self.vec[(height.0.wrapping_add(round) % n) as usize]
    }
}
