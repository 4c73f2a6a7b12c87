//! Entity identifiers and their byte encodings.
//!
//! Encodings are order-preserving: comparing encoded bytes gives the same
//! result as comparing the typed keys, so prefix scans come back in key order.

use keel_types::{Hash256, PublicKey, ScriptHash, StorageKey};

use crate::StoreError;

pub trait StoreKey: Clone + Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(bytes: &[u8]) -> Result<Self, StoreError>;
}

impl StoreKey for Hash256 {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(Hash256::from_slice(bytes)?)
    }
}

impl StoreKey for ScriptHash {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(ScriptHash::from_slice(bytes)?)
    }
}

impl StoreKey for PublicKey {
    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::Corruption(format!("public key of {} bytes", bytes.len())))?;
        Ok(PublicKey(arr))
    }
}

/// Big-endian, so numeric order equals byte order.
impl StoreKey for u32 {
    fn encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let arr: [u8; 4] = bytes
            .try_into()
            .map_err(|_| StoreError::Corruption(format!("u32 key of {} bytes", bytes.len())))?;
        Ok(u32::from_be_bytes(arr))
    }
}

/// Script hash followed by the raw key bytes, no length prefix, so a scan
/// over `script_hash ++ partial key` finds every cell starting with it.
impl StoreKey for StorageKey {
    fn encode(&self) -> Vec<u8> {
        let mut out = self.script_hash.as_bytes().to_vec();
        out.extend_from_slice(&self.key);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() < 20 {
            return Err(StoreError::Corruption(format!(
                "storage key of {} bytes",
                bytes.len()
            )));
        }
        Ok(StorageKey {
            script_hash: ScriptHash::from_slice(&bytes[..20])?,
            key: bytes[20..].to_vec(),
        })
    }
}
