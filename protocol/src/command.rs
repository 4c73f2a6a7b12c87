//! Wire commands: the 12-byte ASCII field of every frame header.

use std::fmt;

use crate::ProtocolError;

/// Width of the command field in the frame header.
pub const COMMAND_SIZE: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    GetAddr,
    Addr,
    GetHeaders,
    Headers,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Consensus,
    Mempool,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::Version,
        Command::Verack,
        Command::GetAddr,
        Command::Addr,
        Command::GetHeaders,
        Command::Headers,
        Command::GetBlocks,
        Command::Inv,
        Command::GetData,
        Command::Block,
        Command::Tx,
        Command::Consensus,
        Command::Mempool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::GetBlocks => "getblocks",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Block => "block",
            Command::Tx => "tx",
            Command::Consensus => "consensus",
            Command::Mempool => "mempool",
        }
    }

    /// Zero-padded ASCII form for the frame header.
    pub fn to_bytes(&self) -> [u8; COMMAND_SIZE] {
        let mut field = [0u8; COMMAND_SIZE];
        let name = self.as_str().as_bytes();
        field[..name.len()].copy_from_slice(name);
        field
    }

    pub fn from_bytes(field: &[u8; COMMAND_SIZE]) -> Result<Self, ProtocolError> {
        let end = field.iter().position(|b| *b == 0).unwrap_or(COMMAND_SIZE);
        if field[end..].iter().any(|b| *b != 0) {
            return Err(ProtocolError::Malformed("command not zero padded".into()));
        }
        let name = std::str::from_utf8(&field[..end])
            .map_err(|_| ProtocolError::Malformed("command is not ASCII".into()))?;
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == name)
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
    }

    /// Sent ahead of everything in the low-priority queue.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Command::Consensus | Command::GetAddr | Command::Mempool)
    }

    /// At most one instance may wait in a session's outbound queue.
    pub fn is_single_flight(&self) -> bool {
        matches!(
            self,
            Command::Addr
                | Command::GetAddr
                | Command::GetBlocks
                | Command::GetHeaders
                | Command::Mempool
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_fits_and_parses_back() {
        for command in Command::ALL {
            assert!(command.as_str().len() <= COMMAND_SIZE);
            assert_eq!(Command::from_bytes(&command.to_bytes()).unwrap(), command);
        }
    }

    #[test]
    fn garbage_after_padding_is_malformed() {
        let mut field = Command::Tx.to_bytes();
        field[5] = b'x';
        assert!(matches!(
            Command::from_bytes(&field),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_name_is_reported() {
        let mut field = [0u8; COMMAND_SIZE];
        field[..4].copy_from_slice(b"ping");
        assert!(matches!(
            Command::from_bytes(&field),
            Err(ProtocolError::UnknownCommand(name)) if name == "ping"
        ));
    }
}
