//! Typed messages and their payload encodings.

use keel_types::encoding::{decode, encode};
use keel_types::{Block, ConsensusPayload, Transaction};

use crate::command::Command;
use crate::payload::{
    AddrPayload, GetBlocksPayload, HeadersPayload, InvPayload, VersionPayload, MAX_ADDR_TO_SEND,
    MAX_HASHES_PER_INV, MAX_HEADERS_COUNT,
};
use crate::ProtocolError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    GetAddr,
    Addr(AddrPayload),
    GetHeaders(GetBlocksPayload),
    Headers(HeadersPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(InvPayload),
    Block(Block),
    Tx(Transaction),
    Consensus(ConsensusPayload),
    Mempool,
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::GetAddr => Command::GetAddr,
            Message::Addr(_) => Command::Addr,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::Block(_) => Command::Block,
            Message::Tx(_) => Command::Tx,
            Message::Consensus(_) => Command::Consensus,
            Message::Mempool => Command::Mempool,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::Version(p) => encode(p),
            Message::Verack | Message::GetAddr | Message::Mempool => Vec::new(),
            Message::Addr(p) => encode(p),
            Message::GetHeaders(p) | Message::GetBlocks(p) => encode(p),
            Message::Headers(p) => encode(p),
            Message::Inv(p) | Message::GetData(p) => encode(p),
            Message::Block(b) => encode(b),
            Message::Tx(t) => encode(t),
            Message::Consensus(c) => encode(c),
        }
    }

    /// Decode and bound-check the payload of a `command` frame.
    pub fn decode(command: Command, payload: &[u8]) -> Result<Self, ProtocolError> {
        let message = match command {
            Command::Verack | Command::GetAddr | Command::Mempool => {
                if !payload.is_empty() {
                    return Err(ProtocolError::Malformed(format!(
                        "{command} carries {} payload bytes",
                        payload.len()
                    )));
                }
                match command {
                    Command::Verack => Message::Verack,
                    Command::GetAddr => Message::GetAddr,
                    _ => Message::Mempool,
                }
            }
            Command::Version => Message::Version(decode(payload)?),
            Command::Addr => {
                let addr: AddrPayload = decode(payload)?;
                bound(command, addr.addresses.len(), MAX_ADDR_TO_SEND)?;
                Message::Addr(addr)
            }
            Command::GetHeaders => Message::GetHeaders(decode(payload)?),
            Command::GetBlocks => Message::GetBlocks(decode(payload)?),
            Command::Headers => {
                let headers: HeadersPayload = decode(payload)?;
                bound(command, headers.headers.len(), MAX_HEADERS_COUNT)?;
                Message::Headers(headers)
            }
            Command::Inv | Command::GetData => {
                let inv: InvPayload = decode(payload)?;
                bound(command, inv.hashes.len(), MAX_HASHES_PER_INV)?;
                if command == Command::Inv {
                    Message::Inv(inv)
                } else {
                    Message::GetData(inv)
                }
            }
            Command::Block => Message::Block(decode(payload)?),
            Command::Tx => Message::Tx(decode(payload)?),
            Command::Consensus => Message::Consensus(decode(payload)?),
        };
        Ok(message)
    }
}

fn bound(command: Command, count: usize, max: usize) -> Result<(), ProtocolError> {
    if count > max {
        return Err(ProtocolError::Malformed(format!(
            "{command} carries {count} entries, limit {max}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Hash256, InventoryType};

    #[test]
    fn oversized_inventory_is_malformed() {
        let inv = InvPayload::new(
            InventoryType::Tx,
            vec![Hash256::ZERO; MAX_HASHES_PER_INV + 1],
        );
        let bytes = encode(&inv);
        assert!(matches!(
            Message::decode(Command::Inv, &bytes),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn empty_commands_reject_payload() {
        assert_eq!(Message::decode(Command::Verack, &[]).unwrap(), Message::Verack);
        assert!(Message::decode(Command::Mempool, &[1]).is_err());
    }

    #[test]
    fn getdata_keeps_its_command() {
        let msg = Message::GetData(InvPayload::new(InventoryType::Block, vec![Hash256::ZERO]));
        let decoded = Message::decode(Command::GetData, &msg.encode_payload()).unwrap();
        assert_eq!(decoded.command(), Command::GetData);
    }
}
