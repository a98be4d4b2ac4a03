//! Transfer bookkeeping.
//!
//! The [`TransferStore`] holds at most one outbound and one inbound chunk
//! set, the sent/received file logs, and the byte counters. It is an owned
//! value; the only writer is the transfer orchestrator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Direction, Error, Result};
use crate::file::FileKind;

/// Chunks of the file currently being sent.
#[derive(Debug)]
pub struct OutboundChunkSet {
    /// Transfer identifier
    pub id: Uuid,
    /// Number of chunks in the set
    pub total_chunks: u64,
    chunks: Vec<Vec<u8>>,
    cursor: u64,
}

impl OutboundChunkSet {
    /// Create a set from pre-split chunks.
    #[must_use]
    pub fn new(id: Uuid, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            id,
            total_chunks: chunks.len() as u64,
            chunks,
            cursor: 0,
        }
    }

    /// Index of the next chunk the peer may request.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether every chunk has been handed out.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.cursor >= self.total_chunks
    }

    /// Hand out chunk `chunk_no`, which must be the next one in order.
    ///
    /// Delivered chunks are released, so a replayed request can never be
    /// served.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedChunk` without mutating the set if `chunk_no` is not
    /// the cursor.
    pub fn take(&mut self, chunk_no: u64) -> Result<Vec<u8>> {
        if chunk_no != self.cursor || self.is_drained() {
            return Err(Error::UnexpectedChunk {
                expected: self.cursor,
                actual: chunk_no,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let chunk = std::mem::take(&mut self.chunks[chunk_no as usize]);
        self.cursor += 1;
        Ok(chunk)
    }
}

/// Chunks of the file currently being received.
#[derive(Debug)]
pub struct InboundChunkSet {
    /// Transfer identifier
    pub id: Uuid,
    /// Number of chunks announced
    pub total_chunks: u64,
    /// Announced file name
    pub name: String,
    /// Announced size in bytes
    pub size: u64,
    /// Announced MIME type
    pub mime_type: String,
    received: Vec<Vec<u8>>,
}

impl InboundChunkSet {
    /// Create an empty set from announced metadata.
    #[must_use]
    pub fn new(id: Uuid, name: String, size: u64, mime_type: String, total_chunks: u64) -> Self {
        Self {
            id,
            total_chunks,
            name,
            size,
            mime_type,
            received: Vec::new(),
        }
    }

    /// Index of the next chunk to request.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.received.len() as u64
    }

    /// Whether every announced chunk has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_index() >= self.total_chunks
    }

    /// Store chunk `chunk_no`, which must be the next one in order.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedChunk` without mutating the set otherwise.
    pub fn append(&mut self, chunk_no: u64, chunk: Vec<u8>) -> Result<()> {
        if chunk_no != self.next_index() || self.is_complete() {
            return Err(Error::UnexpectedChunk {
                expected: self.next_index(),
                actual: chunk_no,
            });
        }
        self.received.push(chunk);
        Ok(())
    }

    /// Reassemble the received chunks in order.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        crate::file::reassemble(&self.received)
    }
}

/// A user-visible entry for one file sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Transfer identifier
    pub id: Uuid,
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// Number of chunks
    pub total_chunks: u64,
    /// File or image
    pub kind: FileKind,
    /// True once the chunk set fully drained
    pub available: bool,
    /// Source path for sent files, stored path for received files
    pub source_ref: Option<PathBuf>,
    /// When the transfer started
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a record that is not yet available.
    #[must_use]
    pub fn new(
        id: Uuid,
        name: String,
        size: u64,
        mime_type: String,
        total_chunks: u64,
        kind: FileKind,
    ) -> Self {
        Self {
            id,
            name,
            size,
            mime_type,
            total_chunks,
            kind,
            available: false,
            source_ref: None,
            created_at: Utc::now(),
        }
    }

    /// Set the source/stored path.
    #[must_use]
    pub fn with_source_ref(mut self, path: PathBuf) -> Self {
        self.source_ref = Some(path);
        self
    }
}

/// Bytes moved over the current connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteCounters {
    /// Chunk bytes delivered to the peer
    pub total_sent: u64,
    /// Chunk bytes received from the peer
    pub total_received: u64,
}

/// Result of storing an inbound chunk.
#[derive(Debug)]
pub enum InboundProgress {
    /// Request this index next
    NeedMore(u64),
    /// The set drained; it has been removed from the store
    Complete(InboundChunkSet),
}

/// Chunk sets, file logs and counters for one process.
#[derive(Debug, Default)]
pub struct TransferStore {
    outbound: Option<OutboundChunkSet>,
    inbound: Option<InboundChunkSet>,
    sent_files: Vec<FileRecord>,
    received_files: Vec<FileRecord>,
    counters: ByteCounters,
}

impl TransferStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a file is being sent.
    #[must_use]
    pub fn is_outbound_active(&self) -> bool {
        self.outbound.is_some()
    }

    /// Whether a file is being received.
    #[must_use]
    pub fn is_inbound_active(&self) -> bool {
        self.inbound.is_some()
    }

    /// The active outbound set.
    #[must_use]
    pub fn outbound(&self) -> Option<&OutboundChunkSet> {
        self.outbound.as_ref()
    }

    /// The active inbound set.
    #[must_use]
    pub fn inbound(&self) -> Option<&InboundChunkSet> {
        self.inbound.as_ref()
    }

    /// Files sent, oldest first.
    #[must_use]
    pub fn sent_files(&self) -> &[FileRecord] {
        &self.sent_files
    }

    /// Files received, oldest first.
    #[must_use]
    pub fn received_files(&self) -> &[FileRecord] {
        &self.received_files
    }

    /// Current byte counters.
    #[must_use]
    pub fn counters(&self) -> ByteCounters {
        self.counters
    }

    /// Fail with `Busy` if a send is already running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy(Direction::Outbound)`.
    pub fn ensure_outbound_idle(&self) -> Result<()> {
        if self.outbound.is_some() {
            return Err(Error::Busy(Direction::Outbound));
        }
        Ok(())
    }

    /// Fail with `Busy` if a receive is already running.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy(Direction::Inbound)`.
    pub fn ensure_inbound_idle(&self) -> Result<()> {
        if self.inbound.is_some() {
            return Err(Error::Busy(Direction::Inbound));
        }
        Ok(())
    }

    /// Log a new sent file and install its chunk set.
    ///
    /// An empty set is not installed; the record is marked available at once.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if a send is already running; nothing is changed.
    pub fn begin_outbound(&mut self, set: OutboundChunkSet, mut record: FileRecord) -> Result<()> {
        self.ensure_outbound_idle()?;

        if set.total_chunks == 0 {
            record.available = true;
        } else {
            self.outbound = Some(set);
        }
        self.sent_files.push(record);
        Ok(())
    }

    /// Log a new received file and install its chunk set.
    ///
    /// An empty set is not installed; the record is marked available at once.
    ///
    /// # Errors
    ///
    /// Returns `Busy` if a receive is already running; nothing is changed.
    pub fn begin_inbound(&mut self, set: InboundChunkSet, mut record: FileRecord) -> Result<()> {
        self.ensure_inbound_idle()?;

        if set.total_chunks == 0 {
            record.available = true;
        } else {
            self.inbound = Some(set);
        }
        self.received_files.push(record);
        Ok(())
    }

    /// Hand out the next outbound chunk and count it as sent.
    ///
    /// Returns the chunk and whether it was the last one; after the last
    /// chunk the sent record becomes available and the set is dropped.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveTransfer` or `UnexpectedChunk` without mutation.
    pub fn take_outbound_chunk(&mut self, chunk_no: u64) -> Result<(Uuid, Vec<u8>, bool)> {
        let set = self
            .outbound
            .as_mut()
            .ok_or(Error::NoActiveTransfer(Direction::Outbound))?;

        let chunk = set.take(chunk_no)?;
        let id = set.id;
        let last = set.is_drained();
        self.counters.total_sent += chunk.len() as u64;

        if last {
            self.outbound = None;
            self.mark_sent_available(id);
        }

        Ok((id, chunk, last))
    }

    /// Store an inbound chunk and count it as received.
    ///
    /// On the last chunk the set is removed and returned for reassembly and
    /// the received record becomes available.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveTransfer` or `UnexpectedChunk` without mutation.
    pub fn append_inbound_chunk(&mut self, chunk_no: u64, chunk: Vec<u8>) -> Result<InboundProgress> {
        let set = self
            .inbound
            .as_mut()
            .ok_or(Error::NoActiveTransfer(Direction::Inbound))?;

        let len = chunk.len() as u64;
        set.append(chunk_no, chunk)?;
        self.counters.total_received += len;

        if !set.is_complete() {
            return Ok(InboundProgress::NeedMore(set.next_index()));
        }

        match self.inbound.take() {
            Some(set) => {
                self.mark_received_available(set.id);
                Ok(InboundProgress::Complete(set))
            }
            None => Err(Error::Internal("inbound set vanished".to_string())),
        }
    }

    fn mark_sent_available(&mut self, id: Uuid) {
        if let Some(record) = self.sent_files.iter_mut().rev().find(|r| r.id == id) {
            record.available = true;
        }
    }

    fn mark_received_available(&mut self, id: Uuid) {
        if let Some(record) = self.received_files.iter_mut().rev().find(|r| r.id == id) {
            record.available = true;
        }
    }

    /// Record where a received file was stored.
    pub fn set_received_path(&mut self, id: Uuid, path: PathBuf) {
        if let Some(record) = self.received_files.iter_mut().rev().find(|r| r.id == id) {
            record.source_ref = Some(path);
        }
    }

    /// Flip a received record back to unavailable after a failed store.
    pub fn mark_received_unavailable(&mut self, id: Uuid) {
        if let Some(record) = self.received_files.iter_mut().rev().find(|r| r.id == id) {
            record.available = false;
        }
    }

    /// Drop both chunk sets and zero the counters. File logs are kept, so
    /// aborted transfers stay visible as unavailable.
    pub fn reset(&mut self) {
        if self.outbound.is_some() || self.inbound.is_some() {
            debug!(
                outbound = self.outbound.is_some(),
                inbound = self.inbound.is_some(),
                "Discarding active chunk sets"
            );
        }
        self.outbound = None;
        self.inbound = None;
        self.counters = ByteCounters::default();
    }
}
