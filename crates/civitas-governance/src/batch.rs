//! Settlement batches.
//!
//! Pending relayed votes are packed into one `castVoteBatch` call against
//! the settlement contract, so the fixed transaction cost is paid once per
//! batch instead of once per voter.

use crate::vote::SignedVote;
use borsh::{BorshDeserialize, BorshSerialize};
use civitas_types::{Ed25519PublicKey, Ed25519Signature, Support};
use std::io;

/// Intrinsic cost of any transaction.
pub const BASE_TX_GAS: u64 = 21_000;
/// Settlement cost of one ballot inside a batch.
pub const GAS_PER_VOTE: u64 = 45_000;
/// What the voter would have paid casting the ballot directly.
pub const STANDALONE_VOTE_GAS: u64 = BASE_TX_GAS + GAS_PER_VOTE;

pub const SETTLEMENT_FUNCTION: &str = "castVoteBatch";

/// One ballot as the settlement contract sees it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SettlementVote {
    pub proposal_id: u64,
    pub voter_key: Ed25519PublicKey,
    pub support: Support,
    pub nonce: u64,
    pub deadline: u64,
    pub weight: u128,
    pub signature: Ed25519Signature,
}

impl From<&SignedVote> for SettlementVote {
    fn from(vote: &SignedVote) -> Self {
        Self {
            proposal_id: vote.proposal_id,
            voter_key: vote.signature.public_key,
            support: vote.support,
            nonce: vote.nonce,
            deadline: vote.deadline,
            weight: vote.signed_weight,
            signature: vote.signature.signature,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SettlementCall {
    pub function: String,
    pub votes: Vec<SettlementVote>,
}

/// Votes selected for one settlement transaction.
#[derive(Debug, Clone, Default)]
pub struct VoteBatch {
    votes: Vec<SignedVote>,
    max_size: usize,
}

impl VoteBatch {
    pub fn new(max_size: usize) -> Self {
        Self {
            votes: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Add a vote; returns it back when the batch is full.
    pub fn add(&mut self, vote: SignedVote) -> Result<(), SignedVote> {
        if self.is_full() {
            return Err(vote);
        }
        self.votes.push(vote);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.votes.len() >= self.max_size
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    pub fn votes(&self) -> &[SignedVote] {
        &self.votes
    }

    pub fn into_votes(self) -> Vec<SignedVote> {
        self.votes
    }

    pub fn call_data(&self) -> io::Result<Vec<u8>> {
        let call = SettlementCall {
            function: SETTLEMENT_FUNCTION.to_string(),
            votes: self.votes.iter().map(SettlementVote::from).collect(),
        };
        borsh::to_vec(&call)
    }

    pub fn gas_limit(&self) -> u64 {
        BASE_TX_GAS + GAS_PER_VOTE * self.votes.len() as u64
    }
}

/// Gas attributed to each vote of a settled batch.
pub fn gas_share(gas_used: u64, votes: usize) -> u64 {
    if votes == 0 {
        return 0;
    }
    gas_used / votes as u64
}

/// Gas a voter saved compared to casting directly.
pub fn gas_saved(share: u64) -> u64 {
    STANDALONE_VOTE_GAS.saturating_sub(share)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vote::VoteStatus;
    use civitas_types::{Address, SignatureEnvelope};
    use uuid::Uuid;

    fn vote(nonce: u64) -> SignedVote {
        SignedVote {
            id: Uuid::new_v4(),
            proposal_id: 1,
            voter: Address::from_bytes([1; 20]),
            support: Support::For,
            nonce,
            deadline: 1_000,
            signed_weight: 0,
            weight: 100,
            signature: SignatureEnvelope::new(
                Ed25519PublicKey::from_bytes([2; 32]),
                Ed25519Signature::from_bytes([3; 64]),
            ),
            status: VoteStatus::Pending,
            relayer: None,
            settlement_tx_hash: None,
            block_number: None,
            gas_used: None,
            gas_saved: None,
            attempts: 0,
            next_attempt_at: 0,
            failure_reason: None,
            created_at: 0,
            claim: None,
        }
    }

    #[test]
    fn test_batch_respects_max_size() {
        let mut batch = VoteBatch::new(2);
        assert!(batch.add(vote(1)).is_ok());
        assert!(batch.add(vote(2)).is_ok());
        assert!(batch.is_full());
        let rejected = batch.add(vote(3)).unwrap_err();
        assert_eq!(rejected.nonce, 3);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_gas_limit_scales_with_votes() {
        let mut batch = VoteBatch::new(10);
        assert_eq!(batch.gas_limit(), BASE_TX_GAS);
        batch.add(vote(1)).unwrap();
        batch.add(vote(2)).unwrap();
        assert_eq!(batch.gas_limit(), BASE_TX_GAS + 2 * GAS_PER_VOTE);
    }

    #[test]
    fn test_call_data_decodes() {
        let mut batch = VoteBatch::new(4);
        batch.add(vote(7)).unwrap();
        let data = batch.call_data().unwrap();
        let call: SettlementCall = borsh::from_slice(&data).unwrap();
        assert_eq!(call.function, SETTLEMENT_FUNCTION);
        assert_eq!(call.votes.len(), 1);
        assert_eq!(call.votes[0].nonce, 7);
        assert_eq!(call.votes[0].voter_key, Ed25519PublicKey::from_bytes([2; 32]));
    }

    #[test]
    fn test_batching_saves_gas() {
        let share = gas_share(BASE_TX_GAS + 10 * GAS_PER_VOTE, 10);
        assert_eq!(share, 2_100 + GAS_PER_VOTE);
        assert_eq!(gas_saved(share), BASE_TX_GAS - 2_100);
        assert_eq!(gas_share(500, 0), 0);
        assert_eq!(gas_saved(u64::MAX), 0);
    }
}
