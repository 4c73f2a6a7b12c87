//! Hash types for blocks, transactions, assets and script identities.

use blake2::digest::consts::{U20, U32};
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypeError;

/// A 32-byte Blake2b-256 digest.
///
/// Identifies blocks, transactions, registered assets and consensus
/// payloads. Ordering is byte-lexicographic, which is also the key order
/// the store uses for prefix scans.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    /// Hash the concatenation of two digests (merkle interior node).
    pub fn combine(left: &Hash256, right: &Hash256) -> Self {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(left.0);
        hasher.update(right.0);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidLength { expected: 32, actual: bytes.len() })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({}…)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl FromStr for Hash256 {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(&hex::decode(s)?)
    }
}

/// A 20-byte Blake2b-160 digest of a verification script.
///
/// Account balances and coin outputs are owned by script hashes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ScriptHash([u8; 20]);

impl ScriptHash {
    pub const ZERO: Self = Self([0u8; 20]);

    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Hash a verification script.
    pub fn digest(script: &[u8]) -> Self {
        let mut hasher = Blake2b::<U20>::new();
        hasher.update(script);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 20] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidLength { expected: 20, actual: bytes.len() })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({}…)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(Hash256::digest(b"keel"), Hash256::digest(b"keel"));
        assert_ne!(Hash256::digest(b"keel"), Hash256::digest(b"leek"));
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let h = Hash256::digest(b"block");
        let parsed: Hash256 = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn parse_rejects_bad_hex() {
        assert!("zz".parse::<Hash256>().is_err());
        assert!("abc".parse::<Hash256>().is_err());
        assert!("abcd".parse::<Hash256>().is_err());
    }

    #[test]
    fn ordering_is_bytewise() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[31] = 9;
        assert!(Hash256::new(b) < Hash256::new(a));
    }

    #[test]
    fn script_hash_is_twenty_bytes() {
        let sh = ScriptHash::digest(b"script");
        assert_eq!(sh.as_bytes().len(), 20);
        assert_ne!(sh, ScriptHash::ZERO);
    }
}
