//! Local delivery mechanism
//!
//! Replays newline-delimited payloads from a file or stdin through a single
//! shard processor. Line `n` (1-based, blank lines excluded) gets sequence
//! number `n`; the checkpoint file holds the last sequence number covered by a
//! successful checkpoint, and a restarted replay skips everything up to it.

use crate::consumer::checkpoint::{CheckpointError, Checkpointer};
use crate::consumer::processor::{RecordProcessor, ShutdownReason};
use crate::consumer::shutdown::ShutdownSignal;
use crate::error::Result;
use crate::record::RawRecord;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info};

/// Longest payload line accepted from a replay input
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Checkpointer persisting the last delivered sequence number to a file
#[derive(Debug)]
pub struct FileCheckpointer {
    path: PathBuf,
    staged: Mutex<Option<u64>>,
}

impl FileCheckpointer {
    /// Create a checkpointer writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            staged: Mutex::new(None),
        }
    }

    /// Checkpoint file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted position, if any
    pub async fn load(&self) -> Result<Option<u64>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => {
                let sequence = text.trim().parse::<u64>().map_err(|e| {
                    crate::error::KsumError::Config(format!(
                        "checkpoint file {} is corrupt: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                Ok(Some(sequence))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the position the next checkpoint will persist
    pub fn stage(&self, sequence: u64) {
        *self.staged.lock() = Some(sequence);
    }

    /// Position the next checkpoint will persist
    pub fn staged(&self) -> Option<u64> {
        *self.staged.lock()
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn checkpoint(&self) -> std::result::Result<(), CheckpointError> {
        let Some(sequence) = self.staged() else {
            return Ok(());
        };

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{}\n", sequence))
            .await
            .map_err(|e| CheckpointError::InvalidState(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| {
                CheckpointError::InvalidState(format!("{}: {}", self.path.display(), e))
            })?;

        debug!(sequence, path = %self.path.display(), "Checkpoint written");
        Ok(())
    }
}

/// Batches lines from a reader into shard records
pub struct ReplaySource<R> {
    lines: FramedRead<R, LinesCodec>,
    shard_id: String,
    batch_size: usize,
    next_sequence: u64,
    resume_after: Option<u64>,
}

impl<R: AsyncRead + Unpin> ReplaySource<R> {
    /// Create a source delivering at most `batch_size` records per batch
    pub fn new(reader: R, shard_id: impl Into<String>, batch_size: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            shard_id: shard_id.into(),
            batch_size: batch_size.max(1),
            next_sequence: 1,
            resume_after: None,
        }
    }

    /// Skip records at or below a previously checkpointed sequence number
    pub fn resume_after(mut self, sequence: Option<u64>) -> Self {
        self.resume_after = sequence;
        self
    }

    /// Shard the records are attributed to
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Next batch, or `None` at end of input
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawRecord>>> {
        let mut batch = Vec::with_capacity(self.batch_size);

        while batch.len() < self.batch_size {
            let line = match self.lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::Io(e))) => return Err(e.into()),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    // Still occupies a sequence number so positions stay stable
                    error!(
                        sequence = self.next_sequence,
                        max = MAX_LINE_LENGTH,
                        "Input line too long, skipping"
                    );
                    self.next_sequence += 1;
                    continue;
                }
                None => break,
            };
            if line.trim().is_empty() {
                continue;
            }

            let sequence = self.next_sequence;
            self.next_sequence += 1;
            if self.resume_after.is_some_and(|done| sequence <= done) {
                continue;
            }

            batch.push(
                RawRecord::new(Bytes::from(line), sequence.to_string(), self.shard_id.clone())
                    .with_arrival(Utc::now()),
            );
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// What a replay run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Batches delivered
    pub batches: u64,
    /// Records delivered
    pub records: u64,
    /// Reason passed to the processor's shutdown
    pub reason: ShutdownReason,
}

/// Drive `processor` over every batch of `source` until the input ends or
/// shutdown is requested.
///
/// End of input shuts the processor down with [`ShutdownReason::Terminate`],
/// like the end of a shard. A shutdown request uses [`ShutdownReason::Zombie`]
/// so unprocessed records are redelivered on the next run.
pub async fn run_replay<P, R>(
    processor: &mut P,
    source: &mut ReplaySource<R>,
    checkpointer: &FileCheckpointer,
    shutdown: &ShutdownSignal,
) -> Result<ReplaySummary>
where
    P: RecordProcessor,
    R: AsyncRead + Unpin,
{
    processor.initialize(source.shard_id()).await;

    let mut summary = ReplaySummary {
        batches: 0,
        records: 0,
        reason: ShutdownReason::Terminate,
    };

    loop {
        let batch = tokio::select! {
            biased;
            _ = shutdown.triggered() => {
                summary.reason = ShutdownReason::Zombie;
                break;
            }
            batch = source.next_batch() => batch,
        };

        let batch = match batch {
            Ok(Some(batch)) => batch,
            Ok(None) => break,
            Err(e) => {
                error!(shard_id = %source.shard_id(), error = %e, "Replay input failed");
                processor.shutdown(checkpointer, ShutdownReason::Zombie).await;
                return Err(e);
            }
        };

        if let Some(last) = batch.last().and_then(|r| r.sequence_number.parse().ok()) {
            checkpointer.stage(last);
        }
        summary.batches += 1;
        summary.records += batch.len() as u64;

        processor.process_records(&batch, checkpointer).await;
    }

    processor.shutdown(checkpointer, summary.reason).await;
    info!(
        shard_id = %source.shard_id(),
        batches = summary.batches,
        records = summary.records,
        reason = %summary.reason,
        "Replay finished"
    );
    Ok(summary)
}
