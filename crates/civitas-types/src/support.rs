use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// Ballot choice.
///
/// Discriminants are part of the signed encoding and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[cfg_attr(feature = "borsh", derive(borsh::BorshSerialize, borsh::BorshDeserialize))]
#[cfg_attr(feature = "borsh", borsh(use_discriminant = true))]
#[repr(u8)]
pub enum Support {
    Against = 0,
    For = 1,
    Abstain = 2,
}

impl Support {
    pub fn as_str(&self) -> &'static str {
        match self {
            Support::Against => "against",
            Support::For => "for",
            Support::Abstain => "abstain",
        }
    }
}

impl fmt::Display for Support {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Support {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "against" | "0" => Ok(Support::Against),
            "for" | "1" => Ok(Support::For),
            "abstain" | "2" => Ok(Support::Abstain),
            other => Err(TypesError::InvalidSupport(other.to_string())),
        }
    }
}
