//! Metrics for the consensus module.
use std::time::Duration;
use vise::{Buckets, Counter, EncodeLabelSet, EncodeLabelValue, Family, Gauge, Histogram, Metrics, Unit};

/// Label for a consensus input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
pub(crate) enum InputLabel {
    /// `Proposal` message.
    Proposal,
    /// `BlockPart` message.
    BlockPart,
    /// `Vote` message.
    Vote,
    /// Fired timeout.
    Timeout,
}

impl InputLabel {
    /// Attaches a result to this label.
    pub(crate) fn with_result<E>(self, result: &Result<(), E>) -> ProcessingLatencyLabels {
        ProcessingLatencyLabels {
            r#type: self,
            result: match result {
                Ok(()) => ResultLabel::Ok,
                Err(_) => ResultLabel::Err,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelValue)]
#[metrics(rename_all = "snake_case")]
enum ResultLabel {
    Ok,
    Err,
}

/// Labels for processing latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EncodeLabelSet)]
pub(crate) struct ProcessingLatencyLabels {
    r#type: InputLabel,
    result: ResultLabel,
}

/// Metrics defined by the consensus module.
#[derive(Debug, Metrics)]
#[metrics(prefix = "keel_bft")]
pub(crate) struct ConsensusMetrics {
    /// Current height of the state machine.
    pub(crate) height: Gauge<u64>,
    /// Current round of the state machine.
    pub(crate) round: Gauge<u64>,
    /// Number of blocks committed since start, including replayed commits.
    pub(crate) committed_blocks: Counter,
    /// Number of WAL entries replayed at startup.
    pub(crate) replayed_entries: Counter,
    /// Number of messages produced before a crash but missing from the WAL,
    /// logged during recovery.
    pub(crate) recovered_messages: Counter,
    /// Latency of a successful fresh signature, including the signing record persist.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) sign_latency: Histogram<Duration>,
    /// Latency of processing inputs.
    #[metrics(buckets = Buckets::LATENCIES, unit = Unit::Seconds)]
    pub(crate) input_processing_latency: Family<ProcessingLatencyLabels, Histogram<Duration>>,
}

/// Global instance of [`ConsensusMetrics`].
#[vise::register]
pub(crate) static METRICS: vise::Global<ConsensusMetrics> = vise::Global::new();
