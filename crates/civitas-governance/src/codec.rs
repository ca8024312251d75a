//! Store keys and serde helpers.

use civitas_types::{Address, Hash};

/// Column names in the backing store.
pub mod columns {
    pub const PROPOSALS: &str = "proposals";
    pub const META: &str = "meta";
    pub const NONCES: &str = "nonces";
    pub const VOTES: &str = "votes";
    pub const BALLOTS: &str = "ballots";
    pub const RELAYER_TXS: &str = "relayer_txs";
    pub const PENDING_OPERATIONS: &str = "pending_operations";
    pub const APPROVALS: &str = "approvals";
    pub const TIMELOCK_OPERATIONS: &str = "timelock_operations";
    pub const TIMELOCK_EVENTS: &str = "timelock_events";
}

pub fn proposal_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// (proposal, voter) uniqueness key.
pub fn ballot_key(proposal_id: u64, voter: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(28);
    key.extend_from_slice(&proposal_id.to_be_bytes());
    key.extend_from_slice(voter.as_bytes());
    key
}

/// (operation, signer) approval key.
pub fn approval_key(operation_hash: &Hash, signer: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(operation_hash.as_bytes());
    key.extend_from_slice(signer.as_bytes());
    key
}

pub fn event_key(operation_hash: &Hash, seq: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(operation_hash.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// `Vec<u8>` as a `0x` hex string.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// `u128` as a decimal string; JSON numbers lose precision past 2^53.
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
