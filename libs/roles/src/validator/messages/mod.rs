//! Messages exchanged and logged by validators.

mod block;
mod committee;
mod consensus;
mod genesis;
mod part_set;
mod proposal;
mod sign_bytes;
mod vote;

pub use block::*;
pub use committee::*;
pub use consensus::*;
pub use genesis::*;
pub use part_set::*;
pub use proposal::*;
pub use sign_bytes::*;
pub use vote::*;
