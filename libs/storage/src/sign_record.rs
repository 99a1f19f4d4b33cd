//! Signing record: the last thing a validator signed.
use crate::metrics;
use anyhow::Context as _;
use keel_roles::validator;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, io::Write as _, path::PathBuf};

/// Last signature produced by a validator key, with the position it was
/// produced for. A fresh key has the default record: height 0, step `None`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRecord {
    /// Height of the last signature.
    pub height: validator::Height,
    /// Round of the last signature.
    pub round: validator::Round,
    /// Step of the last signature.
    pub step: validator::SignStep,
    /// Bytes signed.
    pub sign_bytes: validator::SignBytes,
    /// Signature produced. `None` iff nothing was signed yet.
    pub signature: Option<validator::Signature>,
}

impl SigningRecord {
    /// Position of the last signature. Positions are compared lexicographically.
    pub fn position(&self) -> (validator::Height, validator::Round, validator::SignStep) {
        (self.height, self.round, self.step)
    }
}

/// Storage of the signing record.
///
/// `persist()` has to be durable once it returns: a signature must never be
/// released before the record of it survives a crash.
pub trait SignRecordStore: 'static + fmt::Debug + Send + Sync {
    /// Loads the record. Returns the default record if none was persisted.
    fn load(&self) -> anyhow::Result<SigningRecord>;

    /// Durably overwrites the record.
    fn persist(&self, record: &SigningRecord) -> anyhow::Result<()>;
}

/// Signing record kept in a single JSON file, next to (but independent of)
/// the WAL. Updated by writing a temporary file and renaming it over the
/// old one, so that the file always holds either the old or the new record.
#[derive(Debug, Clone)]
pub struct FileSignRecordStore {
    path: PathBuf,
}

impl FileSignRecordStore {
    /// Store backed by the file at `path`. The file is created on the first
    /// `persist()`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_owned();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SignRecordStore for FileSignRecordStore {
    fn load(&self) -> anyhow::Result<SigningRecord> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SigningRecord::default())
            }
            Err(err) => return Err(err).with_context(|| format!("read {:?}", self.path)),
        };
        serde_json::from_slice(&raw).with_context(|| format!("decode {:?}", self.path))
    }

    fn persist(&self, record: &SigningRecord) -> anyhow::Result<()> {
        let t = metrics::SIGN_RECORD.persist_latency.start();
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("create {dir:?}"))?;
        let tmp = self.tmp_path();
        let raw = serde_json::to_vec(record).context("encode")?;
        let mut file = fs::File::create(&tmp).with_context(|| format!("create {tmp:?}"))?;
        file.write_all(&raw).context("write")?;
        file.sync_all().context("fsync")?;
        drop(file);
        fs::rename(&tmp, &self.path).with_context(|| format!("rename to {:?}", self.path))?;
        // Makes the rename itself durable.
        fs::File::open(&dir)
            .and_then(|d| d.sync_all())
            .with_context(|| format!("fsync {dir:?}"))?;
        t.observe();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_concurrency::ctx;
    use keel_roles::validator::testonly::Setup;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_store() {
        let ctx = ctx::test_root(&ctx::RealClock);
        let rng = &mut ctx.rng();
        let setup = Setup::new(rng, 1);
        let dir = tempfile::tempdir().unwrap();
        let store = FileSignRecordStore::new(dir.path().join("keys/sign_record.json"));

        // Nothing persisted yet.
        assert_eq!(SigningRecord::default(), store.load().unwrap());

        let vote = validator::Vote {
            vote_type: validator::VoteType::Precommit,
            height: validator::Height(3),
            round: validator::Round(1),
            block_id: None,
        };
        let sign_bytes = vote.sign_bytes(&setup.genesis.chain_id);
        let record = SigningRecord {
            height: vote.height,
            round: vote.round,
            step: validator::SignStep::Precommit,
            signature: Some(setup.validator_keys[0].sign(&sign_bytes)),
            sign_bytes,
        };
        store.persist(&record).unwrap();
        assert_eq!(record, store.load().unwrap());
        // A fresh handle sees the same record.
        assert_eq!(record, FileSignRecordStore::new(&store.path).load().unwrap());
        assert!(!store.tmp_path().exists());

        let next = SigningRecord {
            height: validator::Height(4),
            ..record
        };
        store.persist(&next).unwrap();
        assert_eq!(next, store.load().unwrap());
    }

    #[test]
    fn test_corrupted_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sign_record.json");
        fs::write(&path, b"{\"height\":").unwrap();
        assert!(FileSignRecordStore::new(path).load().is_err());
    }
}
