//! Civitas Crypto - signing and verification for the governance pipeline.
//!
//! This crate provides:
//! - Ed25519 keypairs and verification
//! - Domain-separated blake3 hashing
//! - Typed messages (votes, approvals, timelock actions) and their verifier

pub mod ed25519;
pub mod hash;
pub mod typed;
pub mod error;

pub use ed25519::{verify as ed25519_verify, verify_envelope, Keypair};
pub use hash::{domain, hash_for_chain, hash_with_domain};
pub use typed::{
    ApprovalMessage, InvalidReason, SignatureVerifier, TimelockAction, TimelockActionMessage,
    TypedMessage, Verification, VoteMessage,
};
pub use error::CryptoError;
