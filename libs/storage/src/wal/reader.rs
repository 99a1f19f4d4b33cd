use super::{Entry, Error};
use std::{
    fs,
    io::{self, BufRead as _},
    path::Path,
};

/// Lazy iterator over the entries of a log, from the start.
///
/// An unterminated last line is the end of the log. A complete line which
/// doesn't decode yields `Error::Malformed` and ends the iteration.
#[derive(Debug)]
pub struct WalReader {
    file: Option<io::BufReader<fs::File>>,
    /// Number of lines consumed so far.
    line: usize,
}

impl WalReader {
    /// Opens the log at `path`. A missing log reads as empty.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = match fs::File::open(path) {
            Ok(file) => Some(io::BufReader::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Self { file, line: 0 })
    }

    fn next_line(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![];
        if file.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        if buf.pop() != Some(b'\n') {
            tracing::warn!(
                line = self.line,
                bytes = buf.len() + 1,
                "discarding unterminated WAL tail"
            );
            return Ok(None);
        }
        Ok(Some(buf))
    }
}

impl Iterator for WalReader {
    type Item = Result<Entry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let res = match self.next_line() {
            Ok(None) => None,
            Ok(Some(line)) => Some(
                serde_json::from_slice(&line).map_err(|source| Error::Malformed {
                    line: self.line,
                    source,
                }),
            ),
            Err(err) => Some(Err(err)),
        };
        if !matches!(res, Some(Ok(_))) {
            self.file = None;
        }
        res
    }
}
