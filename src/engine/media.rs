//! Media download paths.
//!
//! Photos and small documents are fetched inline during ingestion; documents
//! at or above the configured threshold are queued in a crash-safe file and
//! drained after the message pass, using a resumable chunked transfer that
//! picks up from whatever bytes already landed on disk.

use crate::client::{ChannelClient, ClientError, DocumentHandle};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Small,
    Large,
}

/// Classify a document by its true byte size. Only sizes strictly above the
/// threshold take the deferred large-file path; exactly at the threshold is
/// still small.
pub fn classify(size: u64, threshold: u64) -> MediaClass {
    if threshold < size {
        MediaClass::Large
    } else {
        MediaClass::Small
    }
}

/// Strip anything that could escape the media directory.
pub fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "file".to_string(),
        s => s.to_string(),
    }
}

/// Download a small document fully, writing it to `dest` and returning the
/// bytes for archival. A file already present with the expected size is
/// reused without touching the network.
pub async fn download_small<C: ChannelClient>(
    client: &C,
    doc: &DocumentHandle,
    dest: &Path,
    chunk_size: usize,
) -> Result<Vec<u8>> {
    if let Ok(meta) = tokio::fs::metadata(dest).await {
        if meta.len() == doc.size {
            log::debug!("reusing existing file {}", dest.display());
            return Ok(tokio::fs::read(dest).await?);
        }
    }

    let mut bytes = Vec::with_capacity(doc.size as usize);
    loop {
        let chunk = client.download_chunk(doc, bytes.len() as u64, chunk_size).await?;
        if chunk.is_empty() {
            break;
        }
        bytes.extend_from_slice(&chunk);
        if bytes.len() as u64 >= doc.size {
            break;
        }
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = dest.with_extension("part");
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, dest)
        .await
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;
    Ok(bytes)
}

/// Knobs of the resumable large-file transfer.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTransfer {
    /// Bytes per request, must stay a multiple of 4096.
    pub chunk_size: usize,
    /// Fixed pause before re-requesting a failed chunk.
    pub retry_delay: Duration,
    /// Transient chunk failures tolerated across the whole transfer.
    pub retry_budget: u32,
}

impl Default for ChunkTransfer {
    fn default() -> Self {
        ChunkTransfer {
            chunk_size: 256 * 1024,
            retry_delay: Duration::from_secs(2),
            retry_budget: 10,
        }
    }
}

/// Download a large document to `dest`, resuming from the bytes already on
/// disk. Interruption leaves a valid prefix; the next call continues where
/// this one stopped.
pub async fn download_large<C: ChannelClient>(
    client: &C,
    doc: &DocumentHandle,
    dest: &Path,
    transfer: ChunkTransfer,
) -> Result<(), ClientError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
    }

    let mut offset = match tokio::fs::metadata(dest).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };
    if offset >= doc.size {
        return Ok(());
    }
    if offset > 0 {
        log::info!(
            "resuming {} at {}/{} bytes",
            dest.display(),
            offset,
            doc.size
        );
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dest)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;

    let mut retries_left = transfer.retry_budget;
    while offset < doc.size {
        let chunk = match client.download_chunk(doc, offset, transfer.chunk_size).await {
            Ok(chunk) => chunk,
            Err(err) if retries_left > 0 && chunk_retryable(&err) => {
                retries_left -= 1;
                log::warn!(
                    "chunk at offset {} of {} failed ({}), {} retries left",
                    offset,
                    dest.display(),
                    err,
                    retries_left
                );
                let delay = err.retry_after().unwrap_or(transfer.retry_delay);
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(err) => return Err(err),
        };
        if chunk.is_empty() {
            break;
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        offset += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    Ok(())
}

/// Inside the chunk loop transport hiccups are retryable too; the partial
/// file on disk makes re-requesting the same offset safe.
fn chunk_retryable(err: &ClientError) -> bool {
    err.is_retryable() || matches!(err, ClientError::Transport(_))
}

/// Crash-safe queue of messages whose large documents still need a download.
///
/// The queue maps channel id to pending message ids and is rewritten through
/// a temp file on every mutation, so a crash mid-run never loses or corrupts
/// it. Entries store only ids; document handles are re-fetched when the
/// queue drains, which also refreshes expired file references.
pub struct PendingLargeFiles {
    path: PathBuf,
    queue: BTreeMap<i64, Vec<i64>>,
}

#[derive(Default, Serialize, Deserialize)]
struct QueueFile {
    channels: BTreeMap<i64, Vec<i64>>,
}

impl PendingLargeFiles {
    pub fn load(path: PathBuf) -> Result<Self> {
        let queue = match std::fs::read(&path) {
            Ok(bytes) => {
                let parsed: QueueFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Malformed queue file {}", path.display()))?;
                parsed.channels
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e).context("Failed to read pending-files queue"),
        };
        Ok(PendingLargeFiles { path, queue })
    }

    pub fn push(&mut self, channel_id: i64, message_id: i64) -> Result<()> {
        let ids = self.queue.entry(channel_id).or_default();
        if !ids.contains(&message_id) {
            ids.push(message_id);
            self.persist()?;
        }
        Ok(())
    }

    pub fn ids(&self, channel_id: i64) -> Vec<i64> {
        self.queue.get(&channel_id).cloned().unwrap_or_default()
    }

    pub fn mark_done(&mut self, channel_id: i64, message_id: i64) -> Result<()> {
        if let Some(ids) = self.queue.get_mut(&channel_id) {
            ids.retain(|id| *id != message_id);
            if ids.is_empty() {
                self.queue.remove(&channel_id);
            }
            self.persist()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_vec_pretty(&QueueFile {
            channels: self.queue.clone(),
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
