//! Relayed vote records.

use crate::codec::u128_string;
use civitas_types::{Address, Hash, SignatureEnvelope, Support};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStatus {
    /// Accepted, waiting for a batch
    Pending,
    /// Claimed by a flush whose settlement transaction is in flight
    Submitting,
    /// Included in a settlement transaction
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for VoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VoteStatus::Pending => "pending",
            VoteStatus::Submitting => "submitting",
            VoteStatus::Submitted => "submitted",
            VoteStatus::Confirmed => "confirmed",
            VoteStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A gasless ballot accepted by the relay. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVote {
    pub id: Uuid,
    pub proposal_id: u64,
    pub voter: Address,
    pub support: Support,
    pub nonce: u64,
    pub deadline: u64,
    /// Vote count as signed (quadratic ballots), 0 otherwise
    #[serde(with = "u128_string")]
    pub signed_weight: u128,
    /// Weight counted by the tally
    #[serde(with = "u128_string")]
    pub weight: u128,
    pub signature: SignatureEnvelope,
    pub status: VoteStatus,
    pub relayer: Option<Address>,
    pub settlement_tx_hash: Option<Hash>,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub gas_saved: Option<u64>,
    /// Settlement attempts so far
    pub attempts: u32,
    /// Earliest time the next attempt may be made
    pub next_attempt_at: u64,
    pub failure_reason: Option<String>,
    pub created_at: u64,
    /// Set while a flush owns this vote
    #[serde(default)]
    pub claim: Option<SubmissionClaim>,
}

/// Ownership marker taken by one flush before it talks to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionClaim {
    pub attempt: Uuid,
    pub claimed_at: u64,
}

impl SignedVote {
    /// Whether a flush at `now` may take this vote.
    ///
    /// A claim older than `claim_lease` seconds belongs to a flush that never
    /// came back and is up for grabs again.
    pub fn is_due(&self, now: u64, claim_lease: u64) -> bool {
        match self.status {
            VoteStatus::Pending => self.next_attempt_at <= now,
            VoteStatus::Submitting => self
                .claim
                .map_or(true, |c| c.claimed_at.saturating_add(claim_lease) <= now),
            _ => false,
        }
    }

    /// Whether the vote may still end up Confirmed.
    pub fn is_unsettled(&self) -> bool {
        matches!(
            self.status,
            VoteStatus::Pending | VoteStatus::Submitting | VoteStatus::Submitted
        )
    }

    pub fn is_claimed_by(&self, attempt: Uuid) -> bool {
        self.status == VoteStatus::Submitting && self.claim.map(|c| c.attempt) == Some(attempt)
    }
}

/// Entry of the (proposal, voter) uniqueness index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Ballot {
    Relayed {
        vote_id: Uuid,
    },
    /// Cast directly against the settlement contract
    OnChain {
        support: Support,
        #[serde(with = "u128_string")]
        weight: u128,
        recorded_at: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayerTxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Settlement transaction sent by the relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerTransaction {
    pub tx_hash: Hash,
    pub from: Address,
    pub to: Address,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub gas_used: Option<u64>,
    pub function_name: String,
    pub votes_count: u32,
    pub vote_ids: Vec<Uuid>,
    pub status: RelayerTxStatus,
    pub block_number: Option<u64>,
    pub submitted_at: u64,
}
