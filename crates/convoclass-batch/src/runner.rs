//! Checkpointed batch runner
//!
//! Chunks are processed strictly in order. For each chunk the runner either
//! copies an existing checkpoint to the sink without issuing a request, or
//! classifies the chunk's conversations in batches of concurrent tasks,
//! persists the results as the chunk's checkpoint, and then copies them to the
//! sink. An interrupted run loses at most the chunk in progress.

use crate::checkpoint::CheckpointStore;
use crate::reader::{ChunkReader, InputChunk};
use crate::summary::RunSummary;
use convoclass_classifiers::{ClassifierSet, Evaluator};
use convoclass_core::{Conversation, Error, OutputRecord, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

/// Batch runner options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Input records per checkpointed chunk
    pub chunk_size: usize,

    /// Conversations evaluated concurrently within a chunk
    pub batch_size: usize,

    /// Deadline for one conversation; exceeded conversations are excluded
    pub conversation_timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            batch_size: 50,
            conversation_timeout: None,
        }
    }
}

/// Results of classifying a group of conversations
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    /// Output records in input order
    pub records: Vec<OutputRecord>,

    /// Conversations excluded after a timeout or task failure
    pub failed: usize,
}

/// Runs a classifier set over a line-delimited corpus
pub struct BatchRunner {
    evaluator: Evaluator,
    set: Arc<ClassifierSet>,
    options: RunOptions,
}

impl BatchRunner {
    pub fn new(evaluator: Evaluator, set: ClassifierSet, options: RunOptions) -> Result<Self> {
        if options.chunk_size == 0 {
            return Err(Error::config("chunk_size must be at least 1"));
        }
        if options.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }

        Ok(Self {
            evaluator,
            set: Arc::new(set),
            options,
        })
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Process every chunk of `input`, appending output lines to `sink`
    ///
    /// # Errors
    ///
    /// Fails on input or sink I/O errors and on checkpoint I/O errors
    /// ([`Error::Checkpoint`]). Failures local to one conversation or snippet
    /// never fail the run.
    pub async fn run<R, W>(
        &self,
        input: R,
        sink: &mut W,
        store: &CheckpointStore,
    ) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let mut reader = ChunkReader::new(input, self.options.chunk_size);
        let mut summary = RunSummary::default();

        info!(
            set = self.set.kind(),
            chunk_size = self.options.chunk_size,
            batch_size = self.options.batch_size,
            checkpoint_dir = %store.dir().display(),
            "Starting batch run"
        );

        while let Some(chunk) = reader.next_chunk().await? {
            let index = chunk.index;
            summary.chunks_total += 1;

            let bytes = match store.load(index).await? {
                Some(bytes) => {
                    info!(chunk = index, "Chunk already checkpointed, skipping");
                    metrics::counter!("convoclass_chunks_total", "outcome" => "resumed").increment(1);
                    summary.chunks_resumed += 1;
                    bytes
                }
                None => {
                    let bytes = self.process_chunk(chunk, &mut summary).await?;
                    store.save(index, &bytes).await?;
                    metrics::counter!("convoclass_chunks_total", "outcome" => "processed").increment(1);
                    summary.chunks_processed += 1;
                    bytes
                }
            };

            sink.write_all(&bytes).await?;
        }

        sink.flush().await?;

        summary.model = self.evaluator.model().stats();
        summary.elapsed = start.elapsed();

        info!(
            chunks = summary.chunks_total,
            resumed = summary.chunks_resumed,
            processed = summary.chunks_processed,
            classified = summary.conversations_classified,
            failed = summary.conversations_failed,
            malformed = summary.malformed_lines,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Batch run complete"
        );

        Ok(summary)
    }

    async fn process_chunk(&self, chunk: InputChunk, summary: &mut RunSummary) -> Result<Vec<u8>> {
        let index = chunk.index;
        let start = Instant::now();

        let (conversations, malformed) = chunk.parse();
        summary.malformed_lines += malformed;

        let classified = self.classify(conversations).await;
        summary.conversations_classified += classified.records.len();
        summary.conversations_failed += classified.failed;
        summary.error_labels += classified
            .records
            .iter()
            .map(|r| r.classifications.error_count())
            .sum::<usize>();

        let mut bytes = Vec::new();
        for record in &classified.records {
            bytes.extend_from_slice(record.to_line()?.as_bytes());
        }

        info!(
            chunk = index,
            classified = classified.records.len(),
            failed = classified.failed,
            malformed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chunk classified"
        );

        Ok(bytes)
    }

    /// Classify conversations in concurrent batches, preserving input order
    pub async fn classify(&self, conversations: Vec<Conversation>) -> ClassifiedBatch {
        let mut classified = ClassifiedBatch {
            records: Vec::with_capacity(conversations.len()),
            failed: 0,
        };
        let mut pending = conversations.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<Conversation> = pending.by_ref().take(self.options.batch_size).collect();
            let hashes: Vec<String> = batch.iter().map(|c| c.hash().to_string()).collect();

            let tasks = batch.into_iter().map(|conversation| {
                let evaluator = self.evaluator.clone();
                let set = Arc::clone(&self.set);
                let timeout = self.options.conversation_timeout;

                tokio::spawn(async move {
                    let evaluation = evaluator.evaluate(&conversation, &set);
                    let result = match timeout {
                        Some(limit) => tokio::time::timeout(limit, evaluation)
                            .await
                            .map_err(|_| Error::Timeout)?,
                        None => evaluation.await,
                    };
                    Ok::<_, Error>(OutputRecord::new(conversation.hash(), result))
                })
            });

            for (hash, outcome) in hashes.iter().zip(join_all(tasks).await) {
                let error = match outcome {
                    Ok(Ok(record)) => {
                        classified.records.push(record);
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(join_error) => Error::internal(format!("conversation task failed: {}", join_error)),
                };

                classified.failed += 1;
                warn!(conversation = %hash, error = %error, "Excluding conversation from output");
            }
        }

        classified
    }
}
