//! Lanshare wire protocol.
//!
//! Every application message is a JSON object discriminated by an `event`
//! field, carried inside a length-prefixed frame over TLS.
//!
//! ## Messages
//!
//! | event | direction | payload |
//! |---|---|---|
//! | `connect` | either → peer | `{deviceName}` |
//! | `file_announce` | sender → receiver | `{id, name, size, mimeType, totalChunks}` |
//! | `chunk_request` | receiver → sender | `{chunkNo}` |
//! | `chunk_deliver` | sender → receiver | `{chunkNo, chunk}` (base64) |
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────┬────────────┬─────────────────────┬──────────────────┐
//! │   Magic    │  Version   │       Length        │     Payload      │
//! │  4 bytes   │  2 bytes   │ 4 bytes, big-endian │   JSON message   │
//! └────────────┴────────────┴─────────────────────┴──────────────────┘
//! ```
//!
//! - Magic: `0x4C 0x53 0x48 0x52` ("LSHR")
//! - Version: `0x01 0x00` (1.0)
//!
//! The length prefix keeps a partial read or two coalesced writes from
//! merging or splitting JSON payloads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::{MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// Protocol magic bytes: "LSHR"
pub const MAGIC: [u8; 4] = [0x4C, 0x53, 0x48, 0x52];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 10;

/// Metadata announced before a file's chunks are pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnnounce {
    /// Transfer identifier
    pub id: Uuid,
    /// File name as shown to the user
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// MIME type
    pub mime_type: String,
    /// Number of chunks the receiver must request
    pub total_chunks: u64,
}

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum Message {
    /// Handshake carrying the sender's display name
    Connect {
        /// Display name of the device sending the handshake
        device_name: String,
    },
    /// A new file is ready to be pulled
    FileAnnounce(FileAnnounce),
    /// Ask for one chunk of the announced file
    ChunkRequest {
        /// Zero-based chunk index
        chunk_no: u64,
    },
    /// One chunk of the announced file
    ChunkDeliver {
        /// Zero-based chunk index
        chunk_no: u64,
        /// Chunk bytes, base64 on the wire
        #[serde(with = "base64_bytes")]
        chunk: Vec<u8>,
    },
}

impl Message {
    /// The `event` discriminator of this message.
    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::FileAnnounce(_) => "file_announce",
            Self::ChunkRequest { .. } => "chunk_request",
            Self::ChunkDeliver { .. } => "chunk_deliver",
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// A protocol frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Header for a payload of `len` bytes at the current protocol version.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds the frame limit.
    pub fn for_payload(len: usize) -> Result<Self> {
        if len > MAX_FRAME_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {len} bytes"
            )));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self {
            version: PROTOCOL_VERSION,
            payload_length: len as u32,
        })
    }

    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6..10].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic, major version, or length is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::ProtocolError("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);
        if version.0 != PROTOCOL_VERSION.0 {
            return Err(Error::UnsupportedVersion {
                major: version.0,
                minor: version.1,
            });
        }

        let payload_length = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);

        if payload_length as usize > MAX_FRAME_SIZE {
            return Err(Error::ProtocolError(format!(
                "payload too large: {payload_length} bytes"
            )));
        }

        Ok(Self {
            version,
            payload_length,
        })
    }
}

/// Encode a message to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_message(message: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message from JSON bytes.
///
/// Unknown `event` values, missing fields and invalid base64 are all errors.
///
/// # Errors
///
/// Returns `Error::ProtocolError` if the payload is not a known message.
pub fn decode_message(data: &[u8]) -> Result<Message> {
    serde_json::from_slice(data).map_err(|e| Error::ProtocolError(e.to_string()))
}

/// Read one frame payload from a stream.
///
/// # Errors
///
/// Returns an error if reading fails or the header is invalid.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_length as usize];
    if header.payload_length > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok(payload)
}

/// Write one frame to a stream and flush it.
///
/// # Errors
///
/// Returns an error if the payload is too large or writing fails.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let header = FrameHeader::for_payload(payload.len())?;

    writer.write_all(&header.encode()).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;

    Ok(())
}

/// Read and decode one message.
///
/// # Errors
///
/// Returns an error if reading fails or the frame holds no valid message.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    let payload = read_frame(reader).await?;
    decode_message(&payload)
}

/// Encode and write one message.
///
/// # Errors
///
/// Returns an error if encoding or writing fails.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let payload = encode_message(message)?;
    write_frame(writer, &payload).await
}

/// Read one message with a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if the operation exceeds the specified duration.
pub async fn read_message_with_timeout<R>(reader: &mut R, duration: Duration) -> Result<Message>
where
    R: AsyncReadExt + Unpin,
{
    timeout(duration, read_message(reader))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}

/// Write one message with a timeout.
///
/// # Errors
///
/// Returns `Error::Timeout` if the operation exceeds the specified duration.
pub async fn write_message_with_timeout<W>(
    writer: &mut W,
    message: &Message,
    duration: Duration,
) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(duration, write_message(writer, message))
        .await
        .map_err(|_| Error::Timeout(duration.as_secs()))?
}
