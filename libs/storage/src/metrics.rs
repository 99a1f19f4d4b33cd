//! Storage metrics.
use std::time;

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "keel_storage_wal")]
pub(crate) struct Wal {
    /// Latency of a successful `append()` call, including fsync.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(crate) append_latency: vise::Histogram<time::Duration>,
    /// Number of entries appended since start.
    pub(crate) entries_appended: vise::Counter,
    /// Number of bytes appended since start.
    pub(crate) bytes_appended: vise::Counter,
}

#[vise::register]
pub(crate) static WAL: vise::Global<Wal> = vise::Global::new();

#[derive(Debug, vise::Metrics)]
#[metrics(prefix = "keel_storage_sign_record")]
pub(crate) struct SignRecord {
    /// Latency of a successful `persist()` call of the file store.
    #[metrics(unit = vise::Unit::Seconds, buckets = vise::Buckets::LATENCIES)]
    pub(crate) persist_latency: vise::Histogram<time::Duration>,
}

#[vise::register]
pub(crate) static SIGN_RECORD: vise::Global<SignRecord> = vise::Global::new();
