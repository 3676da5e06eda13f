//! Cryptographic primitives for the Essentia node.
//!
//! - **Ed25519** for signer keys and seal signatures
//! - **Blake2b** for hashing (headers, proof-of-work, bloom bits)
//! - Address derivation: last 20 bytes of Blake2b-256(public key)

pub mod address;
pub mod hash;
pub mod keys;
pub mod sign;

pub use address::derive_address;
pub use hash::{blake2b_256, blake2b_256_multi};
pub use keys::{generate_keypair, keypair_from_private, keypair_from_seed, public_from_private};
pub use sign::{sign_message, verify_signature};
