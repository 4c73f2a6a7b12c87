//! Cryptographic primitives for keel.
//!
//! - **Ed25519** validator keys, with witness and consensus signatures kept
//!   in separate domains
//! - **Blake2b** for hashing (entity hashes, script hashes, frame checksums)
//! - m-of-n **witness** signing and verification over [`keel_types::Contract`]

pub mod hash;
pub mod sign;
pub mod witness;

pub use hash::{blake2b_256, blake2b_256_multi, checksum, double_hash};
pub use sign::{
    generate_keypair, keypair_from_seed, sign_hash, sign_payload, verify_hash, verify_payload,
};
pub use witness::{sign_witness, verify_witness, witness_from_signatures};
