//! Civitas Types - Core type definitions shared by the governance pipeline.
//!
//! This crate provides:
//! - Addresses (20-byte, hex or Bech32m encoded)
//! - Hashes (32-byte, blake3 digests)
//! - Ed25519 signatures, public keys and signature envelopes
//! - Ballot support values

pub mod address;
pub mod hash;
pub mod signature;
pub mod support;
pub mod error;

#[cfg(any(feature = "serde", feature = "borsh"))]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use signature::{Ed25519Signature, Ed25519PublicKey, SignatureEnvelope};
pub use support::Support;
pub use error::TypesError;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Address, Hash,
        Ed25519Signature, Ed25519PublicKey, SignatureEnvelope,
        Support,
        TypesError,
    };
}
