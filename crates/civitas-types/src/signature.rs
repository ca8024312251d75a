use crate::address::Address;
use crate::error::TypesError;
use std::fmt;

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519Signature([u8; 64]);

impl Ed25519Signature {
    pub const LEN: usize = 64;

    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 64 {
            return Err(TypesError::InvalidSignatureLength {
                expected: 64,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl Default for Ed25519Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signature(0x{}...)", &hex::encode(&self.0[..8]))
    }
}

impl fmt::LowerHex for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Ed25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ed25519PublicKey([u8; 32]);

impl Ed25519PublicKey {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 32 {
            return Err(TypesError::InvalidPublicKeyLength {
                expected: 32,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive address from this public key
    pub fn to_address(&self) -> Address {
        Address::from_public_key(&self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519PublicKey(0x{}...)", &hex::encode(&self.0[..8]))
    }
}

impl fmt::LowerHex for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// A signature as submitted by a voter or signer.
///
/// Ed25519 cannot recover a public key from a signature, so the signer's
/// key travels with it. The signer address is derived from `public_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignatureEnvelope {
    pub public_key: Ed25519PublicKey,
    pub signature: Ed25519Signature,
}

impl SignatureEnvelope {
    pub fn new(public_key: Ed25519PublicKey, signature: Ed25519Signature) -> Self {
        Self { public_key, signature }
    }

    /// Address of the key that produced this signature.
    pub fn signer(&self) -> Address {
        self.public_key.to_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_signature() {
        let sig = Ed25519Signature::from_bytes([1u8; 64]);
        assert_eq!(sig.as_bytes(), &[1u8; 64]);
        assert!(!sig.is_zero());
        assert!(Ed25519Signature::default().is_zero());
    }

    #[test]
    fn test_signature_wrong_length() {
        let err = Ed25519Signature::from_slice(&[0u8; 63]).unwrap_err();
        assert_eq!(err, TypesError::InvalidSignatureLength { expected: 64, actual: 63 });
    }

    #[test]
    fn test_public_key_wrong_length() {
        assert!(Ed25519PublicKey::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_envelope_signer_matches_key_address() {
        let pk = Ed25519PublicKey::from_bytes([7u8; 32]);
        let envelope = SignatureEnvelope::new(pk, Ed25519Signature::default());
        assert_eq!(envelope.signer(), pk.to_address());
        assert!(!envelope.signer().is_zero());
    }
}
