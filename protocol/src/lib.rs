//! Wire protocol: framing, commands, payloads, handshake and versioning.

pub mod codec;
pub mod command;
pub mod error;
pub mod handshake;
pub mod message;
pub mod payload;
pub mod version;

pub use codec::{
    decode_frame, encode_frame, read_message, write_message, FrameHeader, HEADER_SIZE,
    PAYLOAD_MAX_SIZE,
};
pub use command::Command;
pub use error::ProtocolError;
pub use handshake::{Handshake, HandshakeState, HandshakeStep};
pub use message::Message;
pub use payload::{
    AddrPayload, GetBlocksPayload, HeadersPayload, InvPayload, NetworkAddress, VersionPayload,
    MAX_ADDR_TO_SEND, MAX_HASHES_PER_INV, MAX_HEADERS_COUNT, SERVICE_FULL_NODE,
};
pub use version::PROTOCOL_VERSION;
