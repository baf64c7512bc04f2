//! Frame layout and (de)serialization.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::crypto::{Nonce, Sealed, Tag, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, FrameError, Result};
use crate::framing::{bits_to_bytes, bytes_to_bits, HEADER_LEN, MAX_BODY_LEN};

/// Message precedence, lowest to highest.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Normal traffic
    Routine = 0x00,
    /// Expedited traffic
    Priority = 0x01,
    /// Handle before any lower precedence
    Immediate = 0x02,
    /// Highest precedence
    Flash = 0x03,
}

impl TryFrom<u8> for Priority {
    type Error = FrameError;

    fn try_from(value: u8) -> std::result::Result<Self, FrameError> {
        match value {
            0x00 => Ok(Priority::Routine),
            0x01 => Ok(Priority::Priority),
            0x02 => Ok(Priority::Immediate),
            0x03 => Ok(Priority::Flash),
            other => Err(FrameError::UnknownPriority(other)),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Routine => "ROUTINE",
            Priority::Priority => "PRIORITY",
            Priority::Immediate => "IMMEDIATE",
            Priority::Flash => "FLASH",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ROUTINE" => Ok(Priority::Routine),
            "PRIORITY" => Ok(Priority::Priority),
            "IMMEDIATE" => Ok(Priority::Immediate),
            "FLASH" => Ok(Priority::Flash),
            _ => Err(Error::config(format!("unknown priority: {}", s))),
        }
    }
}

/// Metadata carried in clear on the wire and authenticated by the AEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Precedence
    pub priority: Priority,
    /// Per-sender monotonic counter
    pub sequence_id: u64,
    /// Sender clock, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl MessageHeader {
    /// Associated data bound into the tag: `priority | sequence | timestamp`.
    pub fn aad(&self) -> [u8; 17] {
        let mut aad = [0u8; 17];
        aad[0] = self.priority as u8;
        aad[1..9].copy_from_slice(&self.sequence_id.to_be_bytes());
        aad[9..].copy_from_slice(&self.timestamp.to_be_bytes());
        aad
    }
}

/// A plaintext command together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Precedence
    pub priority: Priority,
    /// Opaque command bytes
    pub payload: Vec<u8>,
    /// Per-sender monotonic counter
    pub sequence_id: u64,
    /// Sender clock, milliseconds since the Unix epoch
    pub timestamp: u64,
}

impl Message {
    /// The header fields of this message.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            priority: self.priority,
            sequence_id: self.sequence_id,
            timestamp: self.timestamp,
        }
    }
}

/// An encrypted message as it travels on the wire.
///
/// Wire format:
/// ```text
/// ┌─────────┬──────────┬──────────────┬───────────────┬───────────┬────────────┬──────────┐
/// │ Len (2) │ Prio (1) │ Sequence (8) │ Timestamp (8) │ Nonce(12) │ Ciphertext │ Tag (16) │
/// └─────────┴──────────┴──────────────┴───────────────┴───────────┴────────────┴──────────┘
/// ```
/// `Len` is the exact ciphertext + tag length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Header fields
    pub header: MessageHeader,
    /// Encrypted body
    pub sealed: Sealed,
}

impl Frame {
    /// Value of the length prefix.
    pub fn body_len(&self) -> usize {
        self.sealed.ciphertext.len() + TAG_SIZE
    }

    /// Total wire size in bytes.
    pub fn wire_size(&self) -> usize {
        HEADER_LEN + self.body_len()
    }

    /// Serialize to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body_len = self.body_len();
        if body_len > MAX_BODY_LEN {
            return Err(FrameError::LengthOutOfRange(body_len).into());
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);
        buf.put_u16(body_len as u16);
        buf.put_u8(self.header.priority as u8);
        buf.put_u64(self.header.sequence_id);
        buf.put_u64(self.header.timestamp);
        buf.put_slice(self.sealed.nonce.as_bytes());
        buf.put_slice(&self.sealed.ciphertext);
        buf.put_slice(self.sealed.tag.as_bytes());
        Ok(buf.to_vec())
    }

    /// Parse from bytes. The length prefix must account for every byte.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN * 8,
                available: data.len() * 8,
            });
        }

        let mut buf = data;
        let body_len = buf.get_u16() as usize;
        if !(TAG_SIZE..=MAX_BODY_LEN).contains(&body_len) {
            return Err(FrameError::LengthOutOfRange(body_len));
        }

        let received = data.len() - HEADER_LEN;
        if received < body_len {
            return Err(FrameError::Truncated {
                needed: (HEADER_LEN + body_len) * 8,
                available: data.len() * 8,
            });
        }
        if received > body_len {
            return Err(FrameError::LengthMismatch {
                declared: body_len,
                actual: received,
            });
        }

        let priority = Priority::try_from(buf.get_u8())?;
        let sequence_id = buf.get_u64();
        let timestamp = buf.get_u64();
        let mut nonce = [0u8; NONCE_SIZE];
        buf.copy_to_slice(&mut nonce);

        let ciphertext = buf[..body_len - TAG_SIZE].to_vec();
        buf.advance(body_len - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        buf.copy_to_slice(&mut tag);

        Ok(Self {
            header: MessageHeader {
                priority,
                sequence_id,
                timestamp,
            },
            sealed: Sealed {
                ciphertext,
                tag: Tag::from_bytes(tag),
                nonce: Nonce::from_bytes(nonce),
            },
        })
    }
}

/// Serialize a sealed message into its bitstream.
pub fn frame(header: &MessageHeader, sealed: &Sealed) -> Result<Vec<u8>> {
    let frame = Frame {
        header: *header,
        sealed: sealed.clone(),
    };
    Ok(bytes_to_bits(&frame.encode()?))
}

/// Parse a bitstream back into a frame.
///
/// The bitstream must hold exactly one frame; extra or missing bits are
/// reported, never silently dropped.
pub fn deframe(bits: &[u8]) -> std::result::Result<Frame, FrameError> {
    let bytes = bits_to_bytes(bits)?;
    Frame::decode(&bytes)
}
