//! Transfer engine for Lanshare.
//!
//! The [`Orchestrator`] is the chunked send/receive state machine. It owns
//! the [`TransferStore`] and the [`SessionState`], reacts to one decoded
//! [`Message`] at a time, and tells the caller what to write back. It does no
//! I/O, so the whole protocol can be driven in memory.
//!
//! ## Transfer Protocol
//!
//! Stop-and-wait pull, one chunk in flight per direction:
//!
//! ```text
//! sender                          receiver
//!   │── file_announce ────────────────▶│
//!   │◀─────────── chunk_request{0} ────│
//!   │── chunk_deliver{0} ─────────────▶│
//!   │◀─────────── chunk_request{1} ────│
//!   │            ...                   │
//!   │── chunk_deliver{n-1} ───────────▶│  reassemble, store
//! ```
//!
//! - Default chunk size: 8 KiB
//! - Requests and deliveries must follow `0, 1, …, totalChunks-1`
//! - A zero-byte file has no chunks and is complete once announced

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::file::{chunk_bytes, FileKind, FileSource};
use crate::protocol::{FileAnnounce, Message};
use crate::session::{Role, SessionState};
use crate::store::{FileRecord, InboundChunkSet, InboundProgress, OutboundChunkSet, TransferStore};

/// A fully received file, ready for the storage collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// The log entry (already marked available)
    pub record: FileRecord,
    /// Reassembled bytes
    pub payload: Vec<u8>,
}

/// What the caller must do after the orchestrator handled a message.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Message to write back to the peer
    pub reply: Option<Message>,
    /// Outbound transfer that just finished
    pub sent: Option<Uuid>,
    /// Inbound transfer that just finished
    pub received: Option<ReceivedFile>,
}

impl Reaction {
    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            ..Self::default()
        }
    }
}

/// Chunked transfer state machine for one peer.
#[derive(Debug)]
pub struct Orchestrator {
    local_name: String,
    chunk_size: usize,
    session: SessionState,
    store: TransferStore,
}

impl Orchestrator {
    /// Create an orchestrator that announces itself as `local_name`.
    #[must_use]
    pub fn new(local_name: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            local_name: local_name.into(),
            chunk_size: chunk_size.max(1),
            session: SessionState::new(),
            store: TransferStore::new(),
        }
    }

    /// Display name sent in handshakes.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Change the display name used for the next handshake.
    pub fn set_local_name(&mut self, name: impl Into<String>) {
        self.local_name = name.into();
    }

    /// Chunk size used for outgoing files.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Session state.
    #[must_use]
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Mutable session state, for transport lifecycle transitions.
    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    /// Transfer bookkeeping.
    #[must_use]
    pub fn store(&self) -> &TransferStore {
        &self.store
    }

    /// Mutable transfer bookkeeping, for storage results.
    pub fn store_mut(&mut self) -> &mut TransferStore {
        &mut self.store
    }

    /// Whether either direction has a chunk set in flight.
    #[must_use]
    pub fn has_active_transfer(&self) -> bool {
        self.store.is_outbound_active() || self.store.is_inbound_active()
    }

    /// Handshake to send after the client connection is up.
    #[must_use]
    pub fn handshake(&self) -> Message {
        Message::Connect {
            device_name: self.local_name.clone(),
        }
    }

    /// Check that a send could start now, before reading the file.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or `Busy`.
    pub fn ensure_can_send(&self) -> Result<()> {
        if !self.session.is_connected() {
            return Err(Error::NotConnected);
        }
        self.store.ensure_outbound_idle()
    }

    /// Start sending `bytes` read from `source`.
    ///
    /// Returns the transfer id and the `file_announce` to write.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or `Busy`; nothing is changed in that case.
    pub fn begin_send(&mut self, source: &FileSource, bytes: &[u8]) -> Result<(Uuid, Message)> {
        self.ensure_can_send()?;

        let id = Uuid::new_v4();
        let chunks = chunk_bytes(bytes, self.chunk_size);
        let total_chunks = chunks.len() as u64;
        let size = bytes.len() as u64;

        if size != source.size {
            debug!(
                name = %source.name,
                picked = source.size,
                read = size,
                "File size changed since it was picked"
            );
        }

        let record = FileRecord::new(
            id,
            source.name.clone(),
            size,
            source.mime_type.clone(),
            total_chunks,
            source.kind,
        )
        .with_source_ref(source.path.clone());

        self.store
            .begin_outbound(OutboundChunkSet::new(id, chunks), record)?;

        info!(
            %id,
            name = %source.name,
            size,
            total_chunks,
            "Announcing file"
        );

        Ok((
            id,
            Message::FileAnnounce(FileAnnounce {
                id,
                name: source.name.clone(),
                size,
                mime_type: source.mime_type.clone(),
                total_chunks,
            }),
        ))
    }

    /// React to one message from the peer.
    ///
    /// # Errors
    ///
    /// Returns `Busy` for an announce while receiving, and a protocol
    /// violation (`ProtocolError`, `UnexpectedChunk`, `NoActiveTransfer`) for
    /// anything out of sequence. State is never changed when an error is
    /// returned.
    pub fn handle_message(&mut self, message: Message) -> Result<Reaction> {
        if !matches!(message, Message::Connect { .. }) && !self.session.is_connected() {
            return Err(Error::ProtocolError(format!(
                "{} before handshake",
                message.event()
            )));
        }

        match message {
            Message::Connect { device_name } => Ok(self.on_connect(device_name)),
            Message::FileAnnounce(announce) => self.on_announce(announce),
            Message::ChunkRequest { chunk_no } => self.on_chunk_request(chunk_no),
            Message::ChunkDeliver { chunk_no, chunk } => self.on_chunk_deliver(chunk_no, chunk),
        }
    }

    fn on_connect(&mut self, device_name: String) -> Reaction {
        info!(peer = %device_name, "Peer handshake received");
        let completed = self.session.handshake_received(device_name);

        if completed && self.session.role() == Some(Role::Server) {
            Reaction::reply(self.handshake())
        } else {
            Reaction::default()
        }
    }

    fn on_announce(&mut self, announce: FileAnnounce) -> Result<Reaction> {
        self.store.ensure_inbound_idle()?;

        if (announce.size == 0) != (announce.total_chunks == 0) || announce.total_chunks > announce.size {
            return Err(Error::ProtocolError(format!(
                "announce of {} bytes in {} chunks",
                announce.size, announce.total_chunks
            )));
        }

        let kind = if announce.mime_type.starts_with("image/") {
            FileKind::Image
        } else {
            FileKind::File
        };
        let record = FileRecord::new(
            announce.id,
            announce.name.clone(),
            announce.size,
            announce.mime_type.clone(),
            announce.total_chunks,
            kind,
        );
        let set = InboundChunkSet::new(
            announce.id,
            announce.name,
            announce.size,
            announce.mime_type,
            announce.total_chunks,
        );

        info!(
            id = %announce.id,
            name = %record.name,
            size = announce.size,
            total_chunks = announce.total_chunks,
            "Receiving file"
        );

        if announce.total_chunks == 0 {
            let mut record = record;
            self.store.begin_inbound(set, record.clone())?;
            record.available = true;
            return Ok(Reaction {
                received: Some(ReceivedFile {
                    record,
                    payload: Vec::new(),
                }),
                ..Reaction::default()
            });
        }

        self.store.begin_inbound(set, record)?;
        Ok(Reaction::reply(Message::ChunkRequest { chunk_no: 0 }))
    }

    fn on_chunk_request(&mut self, chunk_no: u64) -> Result<Reaction> {
        let (id, chunk, last) = self.store.take_outbound_chunk(chunk_no)?;
        debug!(%id, chunk_no, len = chunk.len(), "Delivering chunk");

        if last {
            info!(%id, "Outbound transfer complete");
        }

        Ok(Reaction {
            reply: Some(Message::ChunkDeliver { chunk_no, chunk }),
            sent: last.then_some(id),
            received: None,
        })
    }

    fn on_chunk_deliver(&mut self, chunk_no: u64, chunk: Vec<u8>) -> Result<Reaction> {
        debug!(chunk_no, len = chunk.len(), "Chunk received");

        match self.store.append_inbound_chunk(chunk_no, chunk)? {
            InboundProgress::NeedMore(next) => {
                Ok(Reaction::reply(Message::ChunkRequest { chunk_no: next }))
            }
            InboundProgress::Complete(set) => {
                let id = set.id;
                let announced = set.size;
                let payload = set.into_payload();

                if payload.len() as u64 != announced {
                    warn!(
                        %id,
                        announced,
                        received = payload.len(),
                        "Received size differs from announced size"
                    );
                }

                let record = self
                    .store
                    .received_files()
                    .iter()
                    .rev()
                    .find(|r| r.id == id)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("no record for transfer {id}")))?;

                info!(%id, name = %record.name, "Inbound transfer complete");
                Ok(Reaction {
                    received: Some(ReceivedFile { record, payload }),
                    ..Reaction::default()
                })
            }
        }
    }

    /// The connection went away: discard both chunk sets, zero the counters
    /// and clear the peer. A listening server keeps its listener.
    pub fn connection_lost(&mut self) {
        self.store.reset();
        self.session.connection_lost();
    }

    /// Full stop: like [`connection_lost`](Self::connection_lost) but the
    /// session returns to idle regardless of role.
    pub fn reset(&mut self) {
        self.store.reset();
        self.session.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use crate::store::ByteCounters;

    fn source(name: &str, size: u64) -> FileSource {
        FileSource {
            path: PathBuf::from(format!("/tmp/{name}")),
            name: name.to_string(),
            size,
            mime_type: "application/octet-stream".to_string(),
            kind: FileKind::File,
        }
    }

    /// A connected client/server pair using the given chunk size.
    fn connected_pair(chunk_size: usize) -> (Orchestrator, Orchestrator) {
        let mut client = Orchestrator::new("Phone", chunk_size);
        let mut server = Orchestrator::new("Desktop", chunk_size);

        server.session_mut().start_listening().unwrap();
        client.session_mut().begin_connect().unwrap();
        client.session_mut().client_connected();

        let reply = server.handle_message(client.handshake()).unwrap().reply.unwrap();
        assert_eq!(
            reply,
            Message::Connect {
                device_name: "Desktop".to_string()
            }
        );
        assert!(client.handle_message(reply).unwrap().reply.is_none());

        assert!(server.session().is_connected());
        assert_eq!(client.session().remote_device_name(), Some("Desktop"));
        assert_eq!(server.session().remote_device_name(), Some("Phone"));
        (client, server)
    }

    /// Pump messages between the pair until both go quiet.
    fn pump(
        first: Message,
        from: &mut Orchestrator,
        to: &mut Orchestrator,
    ) -> Vec<ReceivedFile> {
        let mut received = Vec::new();
        let mut next = Some(first);
        let mut towards_receiver = true;

        while let Some(message) = next.take() {
            let target = if towards_receiver { &mut *to } else { &mut *from };
            let reaction = target.handle_message(message).unwrap();
            received.extend(reaction.received);
            next = reaction.reply;
            towards_receiver = !towards_receiver;
        }
        received
    }

    #[test]
    fn test_three_chunk_scenario() {
        let (mut sender, mut receiver) = connected_pair(4);
        let payload = b"AAAABBBBCC".to_vec();

        let (id, announce) = sender.begin_send(&source("abc.bin", 10), &payload).unwrap();
        match &announce {
            Message::FileAnnounce(a) => assert_eq!(a.total_chunks, 3),
            other => panic!("expected announce, got {other:?}"),
        }

        let request = receiver.handle_message(announce).unwrap().reply.unwrap();
        assert_eq!(request, Message::ChunkRequest { chunk_no: 0 });

        let deliver = sender.handle_message(request).unwrap().reply.unwrap();
        assert_eq!(
            deliver,
            Message::ChunkDeliver {
                chunk_no: 0,
                chunk: b"AAAA".to_vec()
            }
        );

        let request = receiver.handle_message(deliver).unwrap().reply.unwrap();
        assert_eq!(request, Message::ChunkRequest { chunk_no: 1 });
        let deliver = sender.handle_message(request).unwrap().reply.unwrap();
        let request = receiver.handle_message(deliver).unwrap().reply.unwrap();
        assert_eq!(request, Message::ChunkRequest { chunk_no: 2 });

        let reaction = sender.handle_message(request).unwrap();
        assert_eq!(reaction.sent, Some(id));
        let reaction = receiver.handle_message(reaction.reply.unwrap()).unwrap();
        assert!(reaction.reply.is_none());

        let received = reaction.received.unwrap();
        assert_eq!(received.payload, payload);
        assert!(received.record.available);

        assert!(sender.store().sent_files()[0].available);
        assert!(receiver.store().received_files()[0].available);
        assert!(!sender.has_active_transfer());
        assert!(!receiver.has_active_transfer());
        assert_eq!(sender.store().counters().total_sent, 10);
        assert_eq!(receiver.store().counters().total_received, 10);
    }

    #[test]
    fn test_send_requires_connection() {
        let mut idle = Orchestrator::new("Phone", 4);
        assert!(matches!(
            idle.begin_send(&source("a", 1), b"a"),
            Err(Error::NotConnected)
        ));
        assert!(idle.store().sent_files().is_empty());
    }

    #[test]
    fn test_second_send_is_busy() {
        let (mut sender, _receiver) = connected_pair(4);
        let (first, _) = sender.begin_send(&source("a", 8), b"12345678").unwrap();

        assert!(matches!(
            sender.begin_send(&source("b", 2), b"xy"),
            Err(Error::Busy(crate::Direction::Outbound))
        ));
        assert_eq!(sender.store().outbound().unwrap().id, first);
        assert_eq!(sender.store().sent_files().len(), 1);
    }

    #[test]
    fn test_announce_while_receiving_is_busy() {
        let (mut sender, mut receiver) = connected_pair(4);
        let (first, announce) = sender.begin_send(&source("a", 8), b"12345678").unwrap();
        receiver.handle_message(announce).unwrap();

        let second = Message::FileAnnounce(FileAnnounce {
            id: Uuid::new_v4(),
            name: "b".to_string(),
            size: 2,
            mime_type: "text/plain".to_string(),
            total_chunks: 1,
        });
        assert!(matches!(
            receiver.handle_message(second),
            Err(Error::Busy(crate::Direction::Inbound))
        ));

        let inbound = receiver.store().inbound().unwrap();
        assert_eq!(inbound.id, first);
        assert_eq!(inbound.next_index(), 0);
        assert_eq!(receiver.store().received_files().len(), 1);
    }

    #[test]
    fn test_out_of_order_request_is_rejected_without_mutation() {
        let (mut sender, _receiver) = connected_pair(4);
        sender.begin_send(&source("a", 12), b"aaaabbbbcccc").unwrap();

        let err = sender
            .handle_message(Message::ChunkRequest { chunk_no: 1 })
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(sender.store().counters().total_sent, 0);
        assert_eq!(sender.store().outbound().unwrap().cursor(), 0);

        sender
            .handle_message(Message::ChunkRequest { chunk_no: 0 })
            .unwrap();
        let err = sender
            .handle_message(Message::ChunkRequest { chunk_no: 0 })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedChunk {
                expected: 1,
                actual: 0
            }
        ));
        assert_eq!(sender.store().counters().total_sent, 4);
    }

    #[test]
    fn test_out_of_order_delivery_is_rejected_without_mutation() {
        let (mut sender, mut receiver) = connected_pair(4);
        let (_, announce) = sender.begin_send(&source("a", 12), b"aaaabbbbcccc").unwrap();
        receiver.handle_message(announce).unwrap();

        let err = receiver
            .handle_message(Message::ChunkDeliver {
                chunk_no: 2,
                chunk: b"cccc".to_vec(),
            })
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(receiver.store().counters().total_received, 0);
        assert_eq!(receiver.store().inbound().unwrap().next_index(), 0);
    }

    #[test]
    fn test_chunks_without_transfer_are_violations() {
        let (mut a, _b) = connected_pair(4);
        assert!(matches!(
            a.handle_message(Message::ChunkRequest { chunk_no: 0 }),
            Err(Error::NoActiveTransfer(crate::Direction::Outbound))
        ));
        assert!(matches!(
            a.handle_message(Message::ChunkDeliver {
                chunk_no: 0,
                chunk: vec![1]
            }),
            Err(Error::NoActiveTransfer(crate::Direction::Inbound))
        ));
    }

    #[test]
    fn test_messages_before_handshake_are_violations() {
        let mut server = Orchestrator::new("Desktop", 4);
        server.session_mut().start_listening().unwrap();

        let err = server
            .handle_message(Message::ChunkRequest { chunk_no: 0 })
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn test_inconsistent_announce_is_rejected() {
        let (_a, mut b) = connected_pair(4);
        let bogus = Message::FileAnnounce(FileAnnounce {
            id: Uuid::new_v4(),
            name: "x".to_string(),
            size: 0,
            mime_type: "text/plain".to_string(),
            total_chunks: 4,
        });
        assert!(b.handle_message(bogus).is_err());
        assert!(b.store().received_files().is_empty());
    }

    #[test]
    fn test_completion_fires_exactly_on_last_index() {
        for total in 1u64..=5 {
            let (mut sender, mut receiver) = connected_pair(1);
            let payload: Vec<u8> = (0..total).map(|i| i as u8).collect();
            let (_, announce) = sender
                .begin_send(&source("n", total), &payload)
                .unwrap();
            let mut request = receiver.handle_message(announce).unwrap().reply;

            for chunk_no in 0..total {
                let reaction = sender.handle_message(request.take().unwrap()).unwrap();
                let is_last = chunk_no == total - 1;
                assert_eq!(reaction.sent.is_some(), is_last, "sender at {chunk_no}/{total}");
                assert_eq!(sender.store().sent_files()[0].available, is_last);

                let reaction = receiver.handle_message(reaction.reply.unwrap()).unwrap();
                assert_eq!(reaction.received.is_some(), is_last, "receiver at {chunk_no}/{total}");
                assert_eq!(receiver.store().received_files()[0].available, is_last);
                request = reaction.reply;
            }
            assert!(request.is_none());
        }
    }

    #[test]
    fn test_zero_byte_file_completes_on_both_sides() {
        let (mut sender, mut receiver) = connected_pair(4);
        let (_, announce) = sender.begin_send(&source("empty", 0), b"").unwrap();

        assert!(sender.store().sent_files()[0].available);
        assert!(!sender.has_active_transfer());

        let reaction = receiver.handle_message(announce).unwrap();
        assert!(reaction.reply.is_none());
        let received = reaction.received.unwrap();
        assert!(received.payload.is_empty());
        assert!(received.record.available);
        assert!(receiver.store().received_files()[0].available);
    }

    #[test]
    fn test_mid_stream_teardown_resets_both_sides() {
        let (mut sender, mut receiver) = connected_pair(4);
        let (_, announce) = sender.begin_send(&source("a", 12), b"aaaabbbbcccc").unwrap();
        let request = receiver.handle_message(announce).unwrap().reply.unwrap();
        let deliver = sender.handle_message(request).unwrap().reply.unwrap();
        let request = receiver.handle_message(deliver).unwrap().reply.unwrap();
        let deliver = sender.handle_message(request).unwrap().reply.unwrap();
        receiver.handle_message(deliver).unwrap();

        sender.connection_lost();
        receiver.connection_lost();

        for side in [&sender, &receiver] {
            assert!(!side.session().is_connected());
            assert!(!side.has_active_transfer());
            assert_eq!(side.store().counters(), ByteCounters::default());
        }
        assert!(!sender.store().sent_files()[0].available);
        assert!(!receiver.store().received_files()[0].available);
        assert_eq!(sender.session().remote_device_name(), None);
    }

    #[test]
    fn test_transfers_in_both_directions_at_once() {
        let (mut a, mut b) = connected_pair(3);

        let (_, a_announce) = a.begin_send(&source("from-a", 7), b"1234567").unwrap();
        let (_, b_announce) = b.begin_send(&source("from-b", 5), b"abcde").unwrap();

        let at_b = pump(a_announce, &mut a, &mut b);
        let at_a = pump(b_announce, &mut b, &mut a);

        assert_eq!(at_b.len(), 1);
        assert_eq!(at_b[0].payload, b"1234567");
        assert_eq!(at_a.len(), 1);
        assert_eq!(at_a[0].payload, b"abcde");
        assert_eq!(a.store().counters().total_sent, 7);
        assert_eq!(a.store().counters().total_received, 5);
    }
}
