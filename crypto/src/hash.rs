//! Blake2b hashing helpers and the wire checksum.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Compute a 256-bit Blake2b hash of arbitrary data.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Hash of the hash.
pub fn double_hash(data: &[u8]) -> [u8; 32] {
    blake2b_256(&blake2b_256(data))
}

/// Frame checksum: the first four bytes of the double hash, little-endian.
pub fn checksum(payload: &[u8]) -> u32 {
    let digest = double_hash(payload);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}
