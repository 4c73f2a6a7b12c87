//! Message payloads.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use keel_types::{Hash256, Header, InventoryType, Timestamp};

/// Most hashes in one `inv` or `getdata`.
pub const MAX_HASHES_PER_INV: usize = 500;
/// Most headers in one `headers` reply.
pub const MAX_HEADERS_COUNT: usize = 2000;
/// Most addresses in one `addr` reply.
pub const MAX_ADDR_TO_SEND: usize = 200;

/// Service bit: the node stores the full chain.
pub const SERVICE_FULL_NODE: u64 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    pub services: u64,
    pub timestamp: Timestamp,
    /// Listening port, or 0 when the node does not accept connections.
    pub port: u16,
    /// Random per-process value used to detect self and duplicate connections.
    pub nonce: u32,
    pub user_agent: String,
    pub start_height: u32,
    /// Whether the peer wants transactions and consensus messages relayed.
    pub relay: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub timestamp: Timestamp,
    pub services: u64,
    pub address: SocketAddr,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrPayload {
    pub addresses: Vec<NetworkAddress>,
}

/// Locator for `getblocks` and `getheaders`: start after the first known
/// hash, stop at `hash_stop` (zero for no limit).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub hash_start: Vec<Hash256>,
    pub hash_stop: Hash256,
}

impl GetBlocksPayload {
    pub fn from(start: Hash256) -> Self {
        Self {
            hash_start: vec![start],
            hash_stop: Hash256::ZERO,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadersPayload {
    pub headers: Vec<Header>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvPayload {
    pub kind: InventoryType,
    pub hashes: Vec<Hash256>,
}

impl InvPayload {
    pub fn new(kind: InventoryType, hashes: Vec<Hash256>) -> Self {
        Self { kind, hashes }
    }

    /// Split `hashes` into payloads of at most [`MAX_HASHES_PER_INV`].
    pub fn chunked(kind: InventoryType, hashes: &[Hash256]) -> Vec<Self> {
        hashes
            .chunks(MAX_HASHES_PER_INV)
            .map(|chunk| Self::new(kind, chunk.to_vec()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inventories_are_chunked_at_the_limit() {
        let hashes: Vec<Hash256> = (0..1201u32)
            .map(|i| Hash256::digest(&i.to_le_bytes()))
            .collect();
        let chunks = InvPayload::chunked(InventoryType::Tx, &hashes);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.hashes.len()).collect();
        assert_eq!(sizes, vec![500, 500, 201]);
        assert!(InvPayload::chunked(InventoryType::Block, &[]).is_empty());
    }
}
