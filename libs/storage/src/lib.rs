//! Durable state of a validator, kept outside of the blockchain itself:
//! - the consensus write-ahead log, which recovery replays after a restart,
//! - the signing record, which prevents signing two different messages for
//!   the same (height, round, step).
//!
//! The two are persisted independently, and a crash can happen between any
//! two writes to them. Recovery has to cope with every such interleaving.

mod metrics;
mod sign_record;
pub mod testonly;
pub mod wal;

pub use sign_record::{FileSignRecordStore, SignRecordStore, SigningRecord};
