use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// 20-byte account address derived from an ed25519 public key.
///
/// Displayed as lowercase `0x` hex. Parsing accepts hex in any case as well
/// as Bech32m with the `civ` prefix, so every textual form of the same
/// account normalizes to the same bytes before comparison.
///
/// # Derivation
/// `address = blake3(ed25519_pubkey)[0..20]`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);
    pub const LEN: usize = 20;

    /// Bech32m human-readable prefix
    pub const BECH32_HRP: &'static str = "civ";

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Create from a byte slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != 20 {
            return Err(TypesError::InvalidAddressLength(slice.len()));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derive address from ed25519 public key bytes (32 bytes).
    /// Uses blake3 hash, takes first 20 bytes.
    pub fn from_public_key(pubkey: &[u8; 32]) -> Self {
        let hash = blake3::hash(pubkey);
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&hash.as_bytes()[..20]);
        Self(addr)
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }

    /// Convert to hex string without 0x prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Encode as Bech32m with the `civ` prefix.
    pub fn to_bech32(&self) -> Result<String, TypesError> {
        let hrp = bech32::Hrp::parse_unchecked(Self::BECH32_HRP);
        bech32::encode::<bech32::Bech32m>(hrp, &self.0)
            .map_err(|e| TypesError::Bech32Error(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode_upper(self.0))
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lowered = s.to_ascii_lowercase();

        if lowered.starts_with("civ1") {
            let (hrp, data) = bech32::decode(&lowered).map_err(|e| {
                TypesError::Bech32Error(e.to_string())
            })?;

            let expected_hrp = bech32::Hrp::parse_unchecked(Self::BECH32_HRP);
            if hrp != expected_hrp {
                return Err(TypesError::InvalidAddressFormat(format!(
                    "Invalid HRP: expected '{}', got '{}'",
                    Self::BECH32_HRP,
                    hrp
                )));
            }

            Self::from_slice(&data)
        } else if let Some(hex_part) = lowered.strip_prefix("0x") {
            let bytes = hex::decode(hex_part)?;
            Self::from_slice(&bytes)
        } else {
            Err(TypesError::InvalidAddressFormat(s.to_string()))
        }
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_zero() {
        assert_eq!(Address::ZERO.as_bytes(), &[0u8; 20]);
        assert!(Address::ZERO.is_zero());
    }

    #[test]
    fn test_address_from_public_key() {
        let pubkey = [42u8; 32];
        let addr = Address::from_public_key(&pubkey);
        assert!(!addr.is_zero());

        // Deterministic
        assert_eq!(addr, Address::from_public_key(&pubkey));

        // Different pubkey = different address
        assert_ne!(addr, Address::from_public_key(&[43u8; 32]));
    }

    #[test]
    fn test_hex_parse_is_case_insensitive() {
        let addr = Address::from_bytes([0xabu8; 20]);

        let lower: Address = format!("{:x}", addr).parse().unwrap();
        let upper: Address = format!("{:X}", addr).parse().unwrap();
        let shouting: Address = format!("{:X}", addr).replace("0x", "0X").parse().unwrap();

        assert_eq!(lower, addr);
        assert_eq!(upper, addr);
        assert_eq!(shouting, addr);
    }

    #[test]
    fn test_bech32_and_hex_normalize_to_same_address() {
        let bytes: [u8; 20] = (0..20).map(|i| i as u8).collect::<Vec<_>>().try_into().unwrap();
        let addr = Address::from_bytes(bytes);

        let encoded = addr.to_bech32().unwrap();
        assert!(encoded.starts_with("civ1"));

        let from_bech: Address = encoded.parse().unwrap();
        let from_hex: Address = addr.to_string().parse().unwrap();
        assert_eq!(from_bech, from_hex);
    }

    #[test]
    fn test_address_from_str_invalid() {
        assert!(Address::from_str("invalid").is_err());
        assert!(Address::from_str("xyz1qqqq").is_err());
        assert!(Address::from_str("0x1234").is_err());
        assert!(Address::from_str("0xzz").is_err());
    }

    #[test]
    fn test_display_is_prefixed_hex() {
        let addr = Address::from_bytes([0xaa; 20]);
        assert_eq!(addr.to_string(), format!("0x{}", "aa".repeat(20)));
    }
}
