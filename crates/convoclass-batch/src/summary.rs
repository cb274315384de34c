//! Run statistics

use convoclass_classifiers::ModelStats;
use serde::Serialize;
use std::time::Duration;

/// Summary of a completed batch run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Chunks read from the input
    pub chunks_total: usize,

    /// Chunks copied from an existing checkpoint
    pub chunks_resumed: usize,

    /// Chunks classified in this run
    pub chunks_processed: usize,

    /// Conversations written to output by this run's processing
    pub conversations_classified: usize,

    /// Conversations excluded after a timeout or task failure
    pub conversations_failed: usize,

    /// Input lines that could not be parsed
    pub malformed_lines: usize,

    /// Labels recorded as `error`
    pub error_labels: usize,

    /// Model wrapper counters at the end of the run
    pub model: ModelStats,

    pub elapsed: Duration,
}

impl RunSummary {
    /// Conversations classified per second of wall time
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.conversations_classified as f64 / secs
        }
    }

    /// Fraction of remote calls that ended in an error
    pub fn failure_rate(&self) -> f64 {
        let calls = self.model.successes + self.model.failures;
        if calls == 0 {
            0.0
        } else {
            self.model.failures as f64 / calls as f64
        }
    }
}
