//! Fixed-size chunking of a line-delimited input stream
//!
//! Chunk `k` holds input records `[k * chunk_size, (k + 1) * chunk_size)`.
//! Blank lines are skipped and never count toward a chunk; malformed lines do
//! count, so the partitioning depends only on the input text and not on what
//! parses. Lines are kept as raw bytes; invalid UTF-8 is a malformed line.

use convoclass_core::{Conversation, ConversationRecord, Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// One non-blank input line
#[derive(Debug, Clone)]
pub struct InputLine {
    /// 1-based line number in the input stream
    pub line_no: usize,
    /// Line content without the terminator, not validated as UTF-8
    pub bytes: Vec<u8>,
}

/// A chunk of raw input lines, not yet parsed
#[derive(Debug, Clone)]
pub struct InputChunk {
    pub index: usize,
    pub lines: Vec<InputLine>,
}

impl InputChunk {
    /// Parse every line, skipping malformed ones
    ///
    /// Returns the conversations in input order and the number of lines skipped.
    pub fn parse(self) -> (Vec<Conversation>, usize) {
        let mut conversations = Vec::with_capacity(self.lines.len());
        let mut malformed = 0;

        for line in self.lines {
            match parse_line(&line) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    malformed += 1;
                    warn!(chunk = self.index, error = %e, "Skipping malformed input line");
                }
            }
        }

        (conversations, malformed)
    }
}

fn parse_line(line: &InputLine) -> Result<Conversation> {
    let text = std::str::from_utf8(&line.bytes)
        .map_err(|e| Error::malformed_input(line.line_no, e.to_string()))?;
    let record: ConversationRecord = serde_json::from_str(text)
        .map_err(|e| Error::malformed_input(line.line_no, e.to_string()))?;
    Ok(record.into_conversation())
}

/// Reads an input stream one chunk at a time
pub struct ChunkReader<R> {
    input: R,
    chunk_size: usize,
    next_index: usize,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> ChunkReader<R> {
    pub fn new(input: R, chunk_size: usize) -> Self {
        Self {
            input,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            line_no: 0,
        }
    }

    /// Read the next chunk, or `None` at end of input
    pub async fn next_chunk(&mut self) -> Result<Option<InputChunk>> {
        let mut lines = Vec::with_capacity(self.chunk_size);

        while lines.len() < self.chunk_size {
            let mut bytes = Vec::new();
            if self.input.read_until(b'\n', &mut bytes).await? == 0 {
                break;
            }
            self.line_no += 1;

            strip_terminator(&mut bytes);
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            lines.push(InputLine {
                line_no: self.line_no,
                bytes,
            });
        }

        if lines.is_empty() {
            return Ok(None);
        }

        let chunk = InputChunk {
            index: self.next_index,
            lines,
        };
        self.next_index += 1;

        Ok(Some(chunk))
    }
}

fn strip_terminator(bytes: &mut Vec<u8>) {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
}
