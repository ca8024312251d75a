//! Response types that are not governance records themselves.

use civitas_governance::{SignedVote, VoteStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned by `gov_submitVote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub vote_id: Uuid,
    pub proposal_id: u64,
    pub status: VoteStatus,
}

impl From<&SignedVote> for VoteReceipt {
    fn from(vote: &SignedVote) -> Self {
        Self {
            vote_id: vote.id,
            proposal_id: vote.proposal_id,
            status: vote.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub chain_id: u64,
    /// Chain time, or `None` if the chain could not be reached
    pub block_time: Option<u64>,
}
