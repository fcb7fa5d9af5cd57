/// Wire structures for the RtmLink protocol
///
/// Every message on the wire is a fixed 6-byte little-endian header followed
/// by the payload:
///
/// ```text
/// +----------------+----------------------+---------------------+
/// | id: u32 (LE)   | payload_len: u16 (LE)| payload_len bytes   |
/// +----------------+----------------------+---------------------+
/// ```
///
/// The `INFO` control message carries a [`FileInfo`] payload:
/// `total_size: u32 (LE)` followed by the NUL-terminated file name.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{LinkError, Result};
use crate::{MAX_PAYLOAD_SIZE, MSG_ID_INFO, MSG_ID_RESET};

/// Size of the encoded header in bytes
pub const HEADER_SIZE: usize = 6;

/// Message header as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Sequence identifier, or one of the reserved control identifiers
    pub id: u32,

    /// Number of payload bytes following the header
    pub payload_len: u16,
}

impl MessageHeader {
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(LinkError::MalformedMessage(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }
        let id = buf.get_u32_le();
        let payload_len = buf.get_u16_le();
        Ok(Self { id, payload_len })
    }
}

/// A numbered or control message
///
/// Owned exclusively by the send window slot that holds it until the
/// transport confirms delivery or a reset clears the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub payload: Bytes,
}

impl Message {
    /// Create a message, rejecting payloads the transport cannot carry
    pub fn new(id: u32, payload: Bytes) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { id, payload })
    }

    /// The empty `RESET` control message
    pub fn reset() -> Self {
        Self {
            id: MSG_ID_RESET,
            payload: Bytes::new(),
        }
    }

    /// The `INFO` control message announcing `info`
    ///
    /// # Errors
    /// `PayloadTooLarge` when the name does not fit in one message
    pub fn info(info: &FileInfo) -> Result<Self> {
        Self::new(MSG_ID_INFO, info.encode())
    }

    pub fn is_reset(&self) -> bool {
        self.id == MSG_ID_RESET
    }

    pub fn is_info(&self) -> bool {
        self.id == MSG_ID_INFO
    }

    /// Total encoded size including the header
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u32_le(self.id);
        buf.put_u16_le(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode one message; the buffer must hold exactly header plus payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = MessageHeader::decode(bytes)?;
        let body = &bytes[HEADER_SIZE..];
        let len = header.payload_len as usize;
        if body.len() != len {
            return Err(LinkError::MalformedMessage(format!(
                "msg_id {} declares {} payload bytes, carries {}",
                header.id,
                len,
                body.len()
            )));
        }
        Ok(Self {
            id: header.id,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

/// Metadata announced ahead of a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Total bytes the receiver should expect
    pub total_size: u32,

    /// Name of the file on the sending side
    pub name: String,
}

impl FileInfo {
    pub fn new(total_size: u32, name: impl Into<String>) -> Self {
        Self {
            total_size,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.name.len() + 1);
        buf.put_u32_le(self.total_size);
        buf.put_slice(self.name.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }

    /// Decode an `INFO` payload; a missing NUL terminator is tolerated
    pub fn decode(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(LinkError::MalformedMessage(format!(
                "file info needs at least 4 bytes, got {}",
                payload.len()
            )));
        }
        let total_size = payload.get_u32_le();
        let name_bytes = match payload.iter().position(|&b| b == 0) {
            Some(nul) => &payload[..nul],
            None => payload,
        };
        Ok(Self {
            total_size,
            name: String::from_utf8_lossy(name_bytes).into_owned(),
        })
    }
}
