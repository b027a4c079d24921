//! Tabula plugin protocol
//!
//! Wire format for Host <-> Plugin communication over a plain TCP stream.
//! Every frame is a fixed header followed by a JSON payload.
//!
//! # Wire Format
//!
//! Header Format: !BBHQI (16 bytes, Network Byte Order / Big Endian)
//! ```text
//! [VER:1][OP:1][RES:2][CALL_ID:8][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x01)
//! - OP (u8): OpCode
//! - RES (u16): Reserved for future use
//! - CALL_ID (u64): Chosen by the caller, echoed on every reply frame
//! - LEN (u32): Payload length in bytes
//!
//! A Discover call is answered by one `Schemas` frame. A Publish call is
//! answered by zero or more `Record` frames followed by exactly one
//! `EndOfStream` or `Err` frame.

pub mod cancel;
pub mod defaults;
pub mod error;
pub mod types;

pub use cancel::CancellationToken;
pub use types::{
    DiscoverRequest, DiscoverResponse, ErrorKind, ErrorPayload, Property, PropertyType,
    PublishRecord, PublishRequest, PublishSummary, Schema, Signature,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncWrite};

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Host -> Plugin
    Discover = 1, // "Which schemas live behind this pattern?"

    // Plugin -> Host
    Schemas = 2, // "These ones."

    // Host -> Plugin
    Publish = 3, // "Stream the rows of this schema."

    // Plugin -> Host
    Record = 4, // "One row."

    // Plugin -> Host
    EndOfStream = 5, // "No more rows."

    // Bidirectional
    Err = 6, // "Something went wrong; this call is over."
}

impl OpCode {
    /// Convert u8 to OpCode
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::Discover),
            2 => Ok(OpCode::Schemas),
            3 => Ok(OpCode::Publish),
            4 => Ok(OpCode::Record),
            5 => Ok(OpCode::EndOfStream),
            6 => Ok(OpCode::Err),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    /// Convert OpCode to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    pub reserved: u16,
    pub call_id: u64,
    pub payload_len: u32,
}

impl Header {
    pub fn new(opcode: OpCode, call_id: u64, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            reserved: 0,
            call_id,
            payload_len,
        }
    }

    /// Pack header into 16-byte buffer
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.reserved)?;
        cursor.write_u64::<BigEndian>(self.call_id)?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from a buffer of at least 16 bytes
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let reserved = cursor.read_u16::<BigEndian>()?;
        let call_id = cursor.read_u64::<BigEndian>()?;
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            reserved,
            call_id,
            payload_len,
        })
    }
}

/// Protocol message (header + payload)
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a new message
    ///
    /// Returns an error if payload exceeds [`defaults::MAX_FRAME_PAYLOAD`].
    pub fn new(opcode: OpCode, call_id: u64, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > defaults::MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: defaults::MAX_FRAME_PAYLOAD,
            });
        }
        let header = Header::new(opcode, call_id, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Serialize `payload` as JSON into a new message.
    pub fn json<T: Serialize>(opcode: OpCode, call_id: u64, payload: &T) -> Result<Self> {
        Self::new(opcode, call_id, serde_json::to_vec(payload)?)
    }

    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub fn call_id(&self) -> u64 {
        self.header.call_id
    }

    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Pack message into a single contiguous frame (header then payload).
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&self.header.pack()?);
        frame.extend_from_slice(&self.payload);
        Ok(frame)
    }

    /// Unpack a message from a contiguous frame.
    pub fn unpack(frame: &[u8]) -> Result<Self> {
        let header = Header::unpack(frame)?;
        let payload = &frame[HEADER_SIZE..];

        if payload.len() != header.payload_len as usize {
            return Err(ProtocolError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                got: payload.len(),
            });
        }

        Ok(Self {
            header,
            payload: payload.to_vec(),
        })
    }
}

/// Read one frame from `reader`.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between
/// frames. A stream that ends inside a frame is an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut header_buf = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: filled,
            });
        }
        filled += n;
    }

    let header = Header::unpack(&header_buf)?;
    let len = header.payload_len as usize;
    if len > defaults::MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: defaults::MAX_FRAME_PAYLOAD,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::PayloadLengthMismatch {
                expected: len,
                got: 0,
            }
        } else {
            ProtocolError::IoError(e)
        }
    })?;

    Ok(Some(Message { header, payload }))
}

/// Write one frame to `writer` and flush it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    writer.write_all(&message.pack()?).await?;
    writer.flush().await?;
    Ok(())
}
