//! Frame codec.
//!
//! Every message travels as a fixed 24-byte header followed by the payload:
//!
//! | field    | bytes | encoding                                   |
//! |----------|-------|--------------------------------------------|
//! | magic    | 4     | u32 LE, network identifier                 |
//! | command  | 12    | ASCII, zero padded                         |
//! | length   | 4     | u32 LE, payload length                     |
//! | checksum | 4     | u32 LE, first 4 bytes of double-hash       |

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use keel_crypto::checksum;

use crate::command::{Command, COMMAND_SIZE};
use crate::message::Message;
use crate::ProtocolError;

pub const HEADER_SIZE: usize = 4 + COMMAND_SIZE + 4 + 4;

/// Largest payload accepted or sent.
pub const PAYLOAD_MAX_SIZE: usize = 32 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: Command,
    pub length: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Parse a header, checking the magic and the payload bound.
    pub fn parse(bytes: &[u8; HEADER_SIZE], magic: u32) -> Result<Self, ProtocolError> {
        let actual = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if actual != magic {
            return Err(ProtocolError::BadMagic {
                expected: magic,
                actual,
            });
        }
        let mut field = [0u8; COMMAND_SIZE];
        field.copy_from_slice(&bytes[4..4 + COMMAND_SIZE]);
        let command = Command::from_bytes(&field)?;

        let at = 4 + COMMAND_SIZE;
        let length = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        if length as usize > PAYLOAD_MAX_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: length as usize,
                max: PAYLOAD_MAX_SIZE,
            });
        }
        let checksum = u32::from_le_bytes([
            bytes[at + 4],
            bytes[at + 5],
            bytes[at + 6],
            bytes[at + 7],
        ]);
        Ok(Self {
            command,
            length,
            checksum,
        })
    }

    pub fn to_bytes(&self, magic: u32) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&magic.to_le_bytes());
        out[4..4 + COMMAND_SIZE].copy_from_slice(&self.command.to_bytes());
        let at = 4 + COMMAND_SIZE;
        out[at..at + 4].copy_from_slice(&self.length.to_le_bytes());
        out[at + 4..].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }
}

/// Serialize `message` into one complete frame.
pub fn encode_frame(magic: u32, message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let payload = message.encode_payload();
    if payload.len() > PAYLOAD_MAX_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload.len(),
            max: PAYLOAD_MAX_SIZE,
        });
    }
    let header = FrameHeader {
        command: message.command(),
        length: payload.len() as u32,
        checksum: checksum(&payload),
    };
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.to_bytes(magic));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Check the payload against its header and decode it.
pub fn decode_payload(header: &FrameHeader, payload: &[u8]) -> Result<Message, ProtocolError> {
    if checksum(payload) != header.checksum {
        return Err(ProtocolError::ChecksumMismatch {
            command: header.command.to_string(),
        });
    }
    Message::decode(header.command, payload)
}

/// Decode one complete frame held in memory.
pub fn decode_frame(magic: u32, bytes: &[u8]) -> Result<Message, ProtocolError> {
    let head: &[u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| ProtocolError::Malformed(format!("frame of {} bytes", bytes.len())))?;
    let header = FrameHeader::parse(head, magic)?;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != header.length as usize {
        return Err(ProtocolError::Malformed(format!(
            "header announces {} payload bytes, frame holds {}",
            header.length,
            payload.len()
        )));
    }
    decode_payload(&header, payload)
}

/// Read one frame from `reader`.
pub async fn read_message<R>(reader: &mut R, magic: u32) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_SIZE];
    reader.read_exact(&mut head).await?;
    let header = FrameHeader::parse(&head, magic)?;
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload).await?;
    decode_payload(&header, &payload)
}

/// Write one frame to `writer` and flush.
pub async fn write_message<W>(writer: &mut W, magic: u32, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(magic, message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
