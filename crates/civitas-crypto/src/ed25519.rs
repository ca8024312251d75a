use crate::error::CryptoError;
use civitas_types::{Address, Ed25519PublicKey, Ed25519Signature, SignatureEnvelope};
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroize;

/// Ed25519 keypair used by voters, multisig signers and privileged callers.
/// The signing key is zeroized on drop.
pub struct Keypair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = ed25519_dalek::SigningKey::generate(&mut csprng);
        Self { signing_key }
    }

    /// Create from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create from a hex-encoded seed, with or without `0x`.
    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let trimmed = seed_hex.trim();
        let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let mut bytes = hex::decode(trimmed)?;
        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidSeedLength(len));
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();
        let keypair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(keypair)
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        self.public_key().to_address()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let signature = self.signing_key.sign(message);
        Ed25519Signature::from_bytes(signature.to_bytes())
    }

    /// Sign and bundle the public key with the signature.
    pub fn sign_envelope(&self, message: &[u8]) -> SignatureEnvelope {
        SignatureEnvelope::new(self.public_key(), self.sign(message))
    }

    /// Export private key bytes (CAUTION: sensitive)
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({})", self.address())
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        let mut seed = self.to_bytes();
        let keypair = Self::from_seed(&seed);
        seed.zeroize();
        keypair
    }
}

/// Verify an ed25519 signature.
pub fn verify(
    public_key: &Ed25519PublicKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    let pk = ed25519_dalek::VerifyingKey::from_bytes(public_key.as_bytes())
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    pk.verify_strict(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Verify a signature envelope against its own embedded public key.
pub fn verify_envelope(envelope: &SignatureEnvelope, message: &[u8]) -> Result<(), CryptoError> {
    verify(&envelope.public_key, message, &envelope.signature)
}
