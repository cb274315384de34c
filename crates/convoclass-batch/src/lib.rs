//! convoclass Batch
//!
//! Resumable classification of line-delimited conversation corpora.
//!
//! Provides:
//! - Fixed-size input chunking that never parses checkpointed chunks
//! - Atomic per-chunk checkpoints (temp file, fsync, rename)
//! - A runner that classifies each chunk in concurrent batches and streams
//!   results to an output sink in input order

pub mod checkpoint;
pub mod reader;
pub mod runner;
pub mod summary;

pub use checkpoint::CheckpointStore;
pub use reader::{ChunkReader, InputChunk, InputLine};
pub use runner::{BatchRunner, ClassifiedBatch, RunOptions};
pub use summary::RunSummary;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::checkpoint::CheckpointStore;
    pub use crate::runner::{BatchRunner, RunOptions};
    pub use crate::summary::RunSummary;
}
