use super::{Entry, Error, WalReader};
use crate::metrics;
use keel_concurrency::time;
use std::{
    fs,
    io::{self, Read as _, Write as _},
    path::{Path, PathBuf},
};

/// Appending end of the WAL. There is exactly one writer per log.
#[derive(Debug)]
pub struct Wal {
    file: fs::File,
    /// Time of the last entry in the log, if any.
    last_time: Option<time::Utc>,
    entries_written: u64,
}

impl Wal {
    /// Opens the log for appending, creating it if missing.
    /// An unterminated trailing fragment (left by a crash in the middle of an
    /// append) is truncated.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut raw = vec![];
        file.read_to_end(&mut raw)?;
        let valid = raw
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |i| i + 1);
        if valid < raw.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = raw.len() - valid,
                "truncating unterminated WAL tail"
            );
            file.set_len(valid as u64)?;
            file.sync_all()?;
        }
        // Decoding errors are left for the reader to report.
        let last_time = raw[..valid]
            .split(|b| *b == b'\n')
            .rev()
            .find(|l| !l.is_empty())
            .and_then(|l| serde_json::from_slice::<Entry>(l).ok())
            .map(|e| e.time);
        Ok(Self {
            file,
            last_time,
            entries_written: 0,
        })
    }

    /// Reads the whole log at `path`. A missing log is empty.
    pub fn read_all(path: &Path) -> Result<Vec<Entry>, Error> {
        WalReader::open(path)?.collect()
    }

    /// Appends an entry and fsyncs. An entry timestamped before the last one
    /// is written with the last timestamp instead.
    pub fn append(&mut self, mut entry: Entry) -> Result<(), Error> {
        let t = metrics::WAL.append_latency.start();
        if let Some(last) = self.last_time {
            entry.time = entry.time.max(last);
        }
        let mut line = serde_json::to_vec(&entry).map_err(io::Error::from)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        t.observe();
        metrics::WAL.entries_appended.inc();
        metrics::WAL.bytes_appended.inc_by(line.len() as u64);
        tracing::trace!(entry = %String::from_utf8_lossy(&line).trim_end(), "wal append");
        self.last_time = Some(entry.time);
        self.entries_written += 1;
        Ok(())
    }

    /// Number of entries appended through this writer.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }
}
