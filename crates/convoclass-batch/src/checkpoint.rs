//! Durable per-chunk checkpoints
//!
//! Chunk `k` is stored as `<dir>/chunk_<k>.jsonl` holding exactly that chunk's
//! output lines. Writes go to `chunk_<k>.jsonl.tmp`, are fsynced, and are then
//! renamed into place, so a checkpoint is either complete or absent.

use convoclass_core::{Error, OutputRecord, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Directory of chunk checkpoints
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final artifact path for a chunk
    pub fn path(&self, chunk: usize) -> PathBuf {
        self.dir.join(format!("chunk_{}.jsonl", chunk))
    }

    fn tmp_path(&self, chunk: usize) -> PathBuf {
        self.dir.join(format!("chunk_{}.jsonl.tmp", chunk))
    }

    /// Load a chunk's checkpoint bytes
    ///
    /// Returns `None` when no checkpoint exists or when the file is not
    /// well-formed; the latter is logged and the chunk is recomputed.
    pub async fn load(&self, chunk: usize) -> Result<Option<Vec<u8>>> {
        let path = self.path(chunk);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::checkpoint(chunk, format!("{}: {}", path.display(), e))),
        };

        match validate(&bytes) {
            Ok(records) => {
                debug!(chunk, records, path = %path.display(), "Loaded checkpoint");
                Ok(Some(bytes))
            }
            Err(reason) => {
                warn!(
                    chunk,
                    path = %path.display(),
                    reason = %reason,
                    "Ignoring malformed checkpoint; chunk will be recomputed"
                );
                Ok(None)
            }
        }
    }

    /// Atomically persist a chunk's output lines
    pub async fn save(&self, chunk: usize, bytes: &[u8]) -> Result<()> {
        let tmp = self.tmp_path(chunk);
        let path = self.path(chunk);
        let io_err = |e: std::io::Error| Error::checkpoint(chunk, format!("{}: {}", path.display(), e));

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        debug!(chunk, bytes = bytes.len(), path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    /// Remove a chunk's checkpoint, if any
    pub async fn remove(&self, chunk: usize) -> Result<()> {
        match tokio::fs::remove_file(self.path(chunk)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::checkpoint(chunk, e.to_string())),
        }
    }
}

/// Check that every line is a complete output record; returns the record count
fn validate(bytes: &[u8]) -> std::result::Result<usize, String> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if !bytes.ends_with(b"\n") {
        return Err("missing trailing newline".to_string());
    }

    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    let mut records = 0;

    for (i, line) in text.lines().enumerate() {
        serde_json::from_str::<OutputRecord>(line).map_err(|e| format!("line {}: {}", i + 1, e))?;
        records += 1;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LINE: &[u8] = b"{\"conversation_hash\":\"h\",\"classifications\":{\"0\":\"yes\"}}\n";

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path().join("checkpoints"));

        assert!(store.load(0).await.unwrap().is_none());

        store.save(0, LINE).await.unwrap();

        assert_eq!(store.load(0).await.unwrap().as_deref(), Some(LINE));
        assert!(store.path(0).ends_with("chunk_0.jsonl"));
        assert!(!store.tmp_path(0).exists());
    }

    #[tokio::test]
    async fn test_empty_checkpoint_is_valid() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        store.save(3, b"").await.unwrap();
        assert_eq!(store.load(3).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_malformed_checkpoint_treated_as_absent() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        std::fs::write(store.path(0), b"{\"conversation_hash\":\"h\"").unwrap();
        assert!(store.load(0).await.unwrap().is_none());

        std::fs::write(store.path(1), b"not json\n").unwrap();
        assert!(store.load(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_checkpoint_error() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let store = CheckpointStore::new(&blocker);
        let result = store.save(0, LINE).await;

        assert!(matches!(result, Err(Error::Checkpoint { chunk: 0, .. })));
    }

    #[tokio::test]
    async fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(temp_dir.path());

        store.save(0, LINE).await.unwrap();
        store.remove(0).await.unwrap();
        store.remove(0).await.unwrap();
        assert!(store.load(0).await.unwrap().is_none());
    }
}
