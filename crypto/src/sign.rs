//! Validator keys and domain-separated Ed25519 signatures.
//!
//! Nothing is signed raw. Every signature covers
//! `blake2b(domain tag || message)`, so a signature produced for a witness
//! can never be replayed as a consensus payload signature or the other way
//! round, even when the signed bytes coincide.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use keel_types::{ConsensusPayload, Hash256, KeyPair, PrivateKey, PublicKey, Signature};

use crate::hash::blake2b_256_multi;

/// What a signature commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignDomain {
    /// Transaction and block witnesses, over the entity hash.
    Witness,
    /// Consensus payloads, over their signable bytes.
    Consensus,
}

impl SignDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            SignDomain::Witness => b"keel/witness/v1",
            SignDomain::Consensus => b"keel/consensus/v1",
        }
    }

    fn digest(self, message: &[u8]) -> [u8; 32] {
        blake2b_256_multi(&[self.tag(), message])
    }
}

fn sign(domain: SignDomain, message: &[u8], key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&key.0);
    Signature(signing_key.sign(&domain.digest(message)).to_bytes())
}

/// Strict verification: small-order keys and non-canonical signatures fail.
fn verify(domain: SignDomain, message: &[u8], signature: &Signature, key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key.0) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key
        .verify_strict(&domain.digest(message), &signature)
        .is_ok()
}

/// Sign a transaction or block hash for use in a witness.
pub fn sign_hash(hash: &Hash256, key: &PrivateKey) -> Signature {
    sign(SignDomain::Witness, hash.as_bytes(), key)
}

pub fn verify_hash(hash: &Hash256, signature: &Signature, key: &PublicKey) -> bool {
    verify(SignDomain::Witness, hash.as_bytes(), signature, key)
}

/// Signature for `payload`. The payload's own signature field is not
/// covered.
pub fn sign_payload(payload: &ConsensusPayload, key: &PrivateKey) -> Signature {
    sign(SignDomain::Consensus, &payload.signable_bytes(), key)
}

pub fn verify_payload(payload: &ConsensusPayload, key: &PublicKey) -> bool {
    verify(
        SignDomain::Consensus,
        &payload.signable_bytes(),
        &payload.signature,
        key,
    )
}

/// Validator key derived from a 32-byte seed, the form keys take in node
/// configuration.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    keypair(SigningKey::from_bytes(seed))
}

pub fn generate_keypair() -> KeyPair {
    keypair(SigningKey::generate(&mut OsRng))
}

fn keypair(signing_key: SigningKey) -> KeyPair {
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_types::{Block, Header, Timestamp, Transaction, TransactionKind, Witness};

    fn validator(i: u8) -> KeyPair {
        keypair_from_seed(&[i; 32])
    }

    fn block(nonce: u32) -> Block {
        let mut block = Block {
            header: Header {
                version: 0,
                prev_hash: Hash256::digest(b"parent"),
                merkle_root: Hash256::ZERO,
                timestamp: Timestamp::new(1_000),
                index: 7,
                consensus_data: u64::from(nonce),
                next_consensus: Default::default(),
                witness: Witness::default(),
            },
            transactions: vec![Transaction::new(TransactionKind::Miner { nonce })],
        };
        block.rebuild_merkle_root();
        block
    }

    fn payload(validator_index: u16, data: &[u8]) -> ConsensusPayload {
        ConsensusPayload {
            version: 0,
            prev_hash: Hash256::digest(b"parent"),
            block_index: 8,
            validator_index,
            timestamp: Timestamp::new(1_015),
            data: data.to_vec(),
            signature: Signature([0; 64]),
        }
    }

    #[test]
    fn block_signature_binds_the_signer_and_the_block() {
        let (a, b) = (validator(1), validator(2));
        let hash = block(1).hash();
        let signature = sign_hash(&hash, &a.private);

        assert!(verify_hash(&hash, &signature, &a.public));
        assert!(!verify_hash(&hash, &signature, &b.public));
        assert!(!verify_hash(&block(2).hash(), &signature, &a.public));
    }

    #[test]
    fn seeded_validator_signs_deterministically() {
        let hash = block(1).hash();
        assert_eq!(validator(9).public, keypair_from_seed(&[9; 32]).public);
        assert_eq!(
            sign_hash(&hash, &validator(9).private),
            sign_hash(&hash, &validator(9).private)
        );
        assert_ne!(validator(1).public, validator(2).public);
    }

    #[test]
    fn payload_signature_ignores_the_signature_field_only() {
        let key = validator(3);
        let mut signed = payload(2, b"prepare");
        signed.signature = sign_payload(&signed, &key.private);
        assert!(verify_payload(&signed, &key.public));

        let mut moved = signed.clone();
        moved.validator_index = 1;
        assert!(!verify_payload(&moved, &key.public));

        let mut retimed = signed.clone();
        retimed.timestamp = Timestamp::new(1_016);
        assert!(!verify_payload(&retimed, &key.public));
    }

    #[test]
    fn signatures_do_not_cross_domains() {
        let key = validator(4);
        let consensus = payload(0, b"commit");
        let bytes = consensus.signable_bytes();

        // A witness signature over the very bytes a payload signs.
        let as_witness = sign(SignDomain::Witness, &bytes, &key.private);
        let mut forged = consensus.clone();
        forged.signature = as_witness;
        assert!(!verify_payload(&forged, &key.public));

        let mut signed = consensus;
        signed.signature = sign_payload(&signed, &key.private);
        assert!(!verify(SignDomain::Witness, &bytes, &signed.signature, &key.public));
    }

    #[test]
    fn malformed_validator_key_never_verifies() {
        let key = validator(5);
        let hash = block(3).hash();
        let signature = sign_hash(&hash, &key.private);
        assert!(!verify_hash(&hash, &signature, &PublicKey([0xff; 32])));
        assert!(!verify_hash(&hash, &signature, &PublicKey([0; 32])));
    }

    #[test]
    fn generated_keys_sign_blocks() {
        let key = generate_keypair();
        let hash = block(4).hash();
        assert!(verify_hash(&hash, &sign_hash(&hash, &key.private), &key.public));
    }
}
