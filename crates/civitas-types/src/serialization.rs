//! serde and borsh implementations.
//!
//! JSON carries `0x`-prefixed hex strings so RPC payloads and the on-disk
//! store stay human readable. Borsh writes raw fixed-width bytes; typed
//! message hashing and settlement call data depend on that layout.

use crate::*;

#[cfg(feature = "serde")]
mod serde_impls {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;

    impl Serialize for Hash {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Hash {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            Hash::from_str(&s).map_err(serde::de::Error::custom)
        }
    }

    impl Serialize for Address {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.to_string().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Address {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            Address::from_str(&s).map_err(serde::de::Error::custom)
        }
    }

    fn decode_hex<E: serde::de::Error>(s: &str) -> Result<Vec<u8>, E> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        hex::decode(s).map_err(E::custom)
    }

    macro_rules! hex_serde {
        ($ty:ty) => {
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    format!("0x{}", hex::encode(self.as_bytes())).serialize(serializer)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    let s = String::deserialize(deserializer)?;
                    let bytes = decode_hex::<D::Error>(&s)?;
                    <$ty>::from_slice(&bytes).map_err(serde::de::Error::custom)
                }
            }
        };
    }

    hex_serde!(Ed25519Signature);
    hex_serde!(Ed25519PublicKey);

    #[derive(Serialize, Deserialize)]
    struct EnvelopeRepr {
        public_key: Ed25519PublicKey,
        signature: Ed25519Signature,
    }

    impl Serialize for SignatureEnvelope {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            EnvelopeRepr {
                public_key: self.public_key,
                signature: self.signature,
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for SignatureEnvelope {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let repr = EnvelopeRepr::deserialize(deserializer)?;
            Ok(SignatureEnvelope::new(repr.public_key, repr.signature))
        }
    }
}

#[cfg(feature = "borsh")]
mod borsh_impls {
    use super::*;
    use borsh::{BorshDeserialize, BorshSerialize};
    use std::io::{Read, Result, Write};

    macro_rules! fixed_borsh {
        ($ty:ty, $len:expr) => {
            impl BorshSerialize for $ty {
                fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
                    writer.write_all(self.as_bytes())
                }
            }

            impl BorshDeserialize for $ty {
                fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
                    let mut bytes = [0u8; $len];
                    reader.read_exact(&mut bytes)?;
                    Ok(<$ty>::from_bytes(bytes))
                }
            }
        };
    }

    fixed_borsh!(Hash, 32);
    fixed_borsh!(Address, 20);
    fixed_borsh!(Ed25519Signature, 64);
    fixed_borsh!(Ed25519PublicKey, 32);

    impl BorshSerialize for SignatureEnvelope {
        fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
            self.public_key.serialize(writer)?;
            self.signature.serialize(writer)
        }
    }

    impl BorshDeserialize for SignatureEnvelope {
        fn deserialize_reader<R: Read>(reader: &mut R) -> Result<Self> {
            let public_key = Ed25519PublicKey::deserialize_reader(reader)?;
            let signature = Ed25519Signature::deserialize_reader(reader)?;
            Ok(SignatureEnvelope::new(public_key, signature))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "serde")]
    fn test_address_serializes_as_prefixed_hex() {
        let addr = Address::from_bytes([0x11; 20]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "11".repeat(20)));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_address_deserializes_uppercase_hex() {
        let json = format!("\"0x{}\"", "AB".repeat(20));
        let addr: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, Address::from_bytes([0xab; 20]));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_envelope_json_shape() {
        let envelope = SignatureEnvelope::new(
            Ed25519PublicKey::from_bytes([2u8; 32]),
            Ed25519Signature::from_bytes([3u8; 64]),
        );
        let value = serde_json::to_value(envelope).unwrap();
        assert!(value["public_key"].as_str().unwrap().starts_with("0x02"));
        assert!(value["signature"].as_str().unwrap().starts_with("0x03"));

        let back: SignatureEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_signature_rejects_short_hex() {
        let result: Result<Ed25519Signature, _> = serde_json::from_str("\"0x0102\"");
        assert!(result.is_err());
    }

    #[test]
    #[cfg(feature = "borsh")]
    fn test_borsh_layout_is_raw_bytes() {
        let envelope = SignatureEnvelope::new(
            Ed25519PublicKey::from_bytes([9u8; 32]),
            Ed25519Signature::from_bytes([8u8; 64]),
        );
        let encoded = borsh::to_vec(&envelope).unwrap();
        assert_eq!(encoded.len(), 96);
        assert_eq!(&encoded[..32], &[9u8; 32]);

        let addr_bytes = borsh::to_vec(&Address::from_bytes([1u8; 20])).unwrap();
        assert_eq!(addr_bytes, vec![1u8; 20]);
    }
}
