//! Consensus write-ahead log.
//!
//! The WAL is a file of JSON lines, one entry per line:
//! `{"time": <RFC 3339 UTC>, "msg": {"type": <tag>, ...}}`.
//! Every append is fsynced before it returns. A crash in the middle of an
//! append leaves an unterminated last line, which is not an entry: the
//! reader stops before it and the writer truncates it on open.
use keel_concurrency::time;
use keel_roles::validator;
use serde::{Deserialize, Serialize};

mod reader;
#[cfg(test)]
mod tests;
mod writer;

pub use reader::WalReader;
pub use writer::Wal;

/// Logged consensus event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A scheduled timeout fired.
    Timeout(validator::TimeoutInfo),
    /// The state machine entered a new round state.
    RoundStep(validator::RoundState),
    /// A consensus message was received or produced.
    Message(validator::PeerMessage),
}

/// WAL entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Time of the event. Non-decreasing along the log.
    #[serde(with = "rfc3339")]
    pub time: time::Utc,
    /// Event.
    #[serde(rename = "msg")]
    pub payload: Payload,
}

impl Entry {
    /// Entry for a fired timeout.
    pub fn timeout(time: time::Utc, timeout: validator::TimeoutInfo) -> Self {
        Self {
            time,
            payload: Payload::Timeout(timeout),
        }
    }

    /// Round state marker.
    pub fn round_step(time: time::Utc, state: validator::RoundState) -> Self {
        Self {
            time,
            payload: Payload::RoundStep(state),
        }
    }

    /// Received or produced message.
    pub fn message(time: time::Utc, msg: validator::PeerMessage) -> Self {
        Self {
            time,
            payload: Payload::Message(msg),
        }
    }
}

/// WAL error. Both variants are fatal to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading or writing the file failed.
    #[error("wal io: {0}")]
    Io(#[from] std::io::Error),
    /// A complete line didn't decode as an entry.
    #[error("malformed wal entry at line {line}: {source}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// Decoding error.
        source: serde_json::Error,
    },
}

/// RFC 3339 encoding of UTC timestamps.
mod rfc3339 {
    use keel_concurrency::time;
    use serde::{de::Error as _, ser::Error as _, Deserialize as _, Deserializer, Serializer};
    use ::time::format_description::well_known::Rfc3339;

    pub(super) fn serialize<S: Serializer>(t: &time::Utc, s: S) -> Result<S::Ok, S::Error> {
        let text = t.to_datetime().format(&Rfc3339).map_err(S::Error::custom)?;
        s.serialize_str(&text)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<time::Utc, D::Error> {
        let text = String::deserialize(d)?;
        let t = ::time::OffsetDateTime::parse(&text, &Rfc3339).map_err(D::Error::custom)?;
        Ok(time::Utc::from_datetime(t))
    }
}
