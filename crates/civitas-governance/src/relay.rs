//! Gasless vote relay.
//!
//! Voters sign a [`VoteMessage`] off-chain. The relay validates it, reserves
//! the nonce, stores the ballot as pending, and later settles pending
//! ballots in batches through the chain client. A ballot moves
//! Pending -> Submitting -> Submitted -> Confirmed, or ends Failed once its
//! retries run out.
//!
//! No lock is held across chain calls. A flush claims its votes in a store
//! transaction before submitting and records the result only for votes it
//! still owns; reconciliation applies a receipt only while the settlement is
//! still pending.

use crate::batch::{gas_saved, gas_share, VoteBatch, SETTLEMENT_FUNCTION};
use crate::chain::{ChainClient, ReceiptStatus, TransactionRequest};
use crate::codec::{ballot_key, columns, u128_string};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::nonce::reserve_in;
use crate::proposal::{ProposalStatus, ProposalStore};
use crate::rate_limit::RateLimiter;
use crate::vote::{
    Ballot, RelayerTransaction, RelayerTxStatus, SignedVote, SubmissionClaim, VoteStatus,
};
use crate::voting::ballot_weight;
use civitas_crypto::{CryptoError, SignatureVerifier, Verification, VoteMessage};
use civitas_storage::{Database, Transaction};
use civitas_types::{Address, Hash, SignatureEnvelope, Support};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Signed ballot as received from a voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub proposal_id: u64,
    pub voter: Address,
    pub support: Support,
    pub nonce: u64,
    pub deadline: u64,
    /// Quadratic vote count; ignored on linear proposals
    #[serde(default, with = "u128_string")]
    pub weight: u128,
    pub signature: SignatureEnvelope,
}

impl VoteRequest {
    pub fn message(&self) -> VoteMessage {
        VoteMessage {
            proposal_id: self.proposal_id,
            support: self.support,
            nonce: self.nonce,
            deadline: self.deadline,
            weight: self.weight,
        }
    }
}

/// Result of checking one settlement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Confirmed { block_number: u64, gas_used: u64 },
    Reverted,
    /// No receipt within the confirmation timeout; votes go back to the queue
    TimedOut,
    StillPending,
    AlreadyFinal,
}

enum Admission {
    Accepted(SignedVote),
    Duplicate,
}

#[derive(Clone)]
pub struct VoteRelay {
    db: Database,
    config: Arc<GovernanceConfig>,
    chain: Arc<dyn ChainClient>,
    proposals: ProposalStore,
    verifier: SignatureVerifier,
    limiter: RateLimiter,
}

impl VoteRelay {
    pub fn new(
        db: Database,
        config: Arc<GovernanceConfig>,
        chain: Arc<dyn ChainClient>,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            proposals: ProposalStore::new(db.clone()),
            verifier: SignatureVerifier::new(config.chain_id),
            db,
            config,
            chain,
            limiter,
        }
    }

    /// Validate and accept a signed ballot.
    ///
    /// Checks run in order: proposal open, signature deadline, rate limit,
    /// signature, voting power. Then one transaction reserves the nonce and
    /// claims the (proposal, voter) slot. A duplicate ballot still consumes
    /// its nonce.
    pub fn submit_vote(&self, request: VoteRequest, now: u64) -> Result<SignedVote> {
        let proposal = self.proposals.get(request.proposal_id)?;
        if proposal.status != ProposalStatus::Active {
            return Err(GovernanceError::ProposalNotActive {
                id: proposal.id,
                status: proposal.status.to_string(),
            });
        }
        if !proposal.is_open(now) {
            return Err(GovernanceError::VotingClosed(proposal.id));
        }

        if request.deadline < now {
            return Err(GovernanceError::DeadlineExpired {
                deadline: request.deadline,
                now,
            });
        }
        let horizon = now.saturating_add(self.config.signature_deadline_seconds);
        if request.deadline > horizon {
            return Err(GovernanceError::DeadlineTooFar {
                deadline: request.deadline,
                max: horizon,
            });
        }

        self.limiter.check_address("vote", &request.voter)?;

        if let Verification::Invalid(reason) =
            self.verifier
                .verify(&request.message().into(), &request.signature, &request.voter)
        {
            warn!(voter = %request.voter, ?reason, "Rejected vote signature");
            return Err(GovernanceError::InvalidSignature(format!("{reason:?}")));
        }

        let weight = ballot_weight(&proposal, &request.voter, request.weight)?;

        let admission = self.db.update(|txn| {
            reserve_in(txn, &request.voter, request.nonce, now)?;

            let slot = ballot_key(request.proposal_id, &request.voter);
            if txn.contains(columns::BALLOTS, &slot)? {
                return Ok::<_, GovernanceError>(Admission::Duplicate);
            }

            let vote = SignedVote {
                id: Uuid::new_v4(),
                proposal_id: request.proposal_id,
                voter: request.voter,
                support: request.support,
                nonce: request.nonce,
                deadline: request.deadline,
                signed_weight: request.weight,
                weight,
                signature: request.signature,
                status: VoteStatus::Pending,
                relayer: None,
                settlement_tx_hash: None,
                block_number: None,
                gas_used: None,
                gas_saved: None,
                attempts: 0,
                next_attempt_at: now,
                failure_reason: None,
                created_at: now,
                claim: None,
            };
            txn.put_json(columns::BALLOTS, &slot, &Ballot::Relayed { vote_id: vote.id })?;
            txn.put_json(columns::VOTES, vote.id.as_bytes(), &vote)?;
            Ok(Admission::Accepted(vote))
        })?;

        match admission {
            Admission::Accepted(vote) => {
                info!(
                    vote_id = %vote.id,
                    proposal_id = vote.proposal_id,
                    voter = %vote.voter,
                    support = %vote.support,
                    "Vote accepted"
                );
                Ok(vote)
            }
            Admission::Duplicate => Err(GovernanceError::DuplicateVote {
                proposal_id: request.proposal_id,
                voter: request.voter,
            }),
        }
    }

    pub fn vote(&self, id: &Uuid) -> Result<SignedVote> {
        self.db
            .get_json(columns::VOTES, id.as_bytes())?
            .ok_or_else(|| GovernanceError::VoteNotFound(id.to_string()))
    }

    pub fn votes_for_proposal(&self, proposal_id: u64) -> Result<Vec<SignedVote>> {
        let votes: Vec<SignedVote> = self.db.scan_json(columns::VOTES)?;
        Ok(votes
            .into_iter()
            .filter(|v| v.proposal_id == proposal_id)
            .collect())
    }

    /// Votes that may be attempted at `now`, oldest first.
    pub fn due_votes(&self, now: u64) -> Result<Vec<SignedVote>> {
        let votes = self.db.scan_json::<SignedVote>(columns::VOTES)?;
        Ok(self.select_due(votes, now))
    }

    fn select_due(&self, votes: Vec<SignedVote>, now: u64) -> Vec<SignedVote> {
        let lease = self.config.confirmation_timeout_seconds;
        let mut due: Vec<SignedVote> = votes.into_iter().filter(|v| v.is_due(now, lease)).collect();
        due.sort_by_key(|v| (v.created_at, v.nonce));
        due
    }

    /// Take up to `batch_size` due votes for one flush.
    fn claim_batch(&self, now: u64) -> Result<(Uuid, VoteBatch)> {
        let attempt = Uuid::new_v4();
        let claim = SubmissionClaim {
            attempt,
            claimed_at: now,
        };
        self.db.update(|txn| {
            let votes = txn.scan_json::<SignedVote>(columns::VOTES)?;
            let mut batch = VoteBatch::new(self.config.batch_size);
            for mut vote in self.select_due(votes, now) {
                if batch.is_full() {
                    break;
                }
                if vote.status == VoteStatus::Submitting {
                    warn!(vote_id = %vote.id, "Reclaiming vote from an abandoned flush");
                }
                vote.status = VoteStatus::Submitting;
                vote.claim = Some(claim);
                txn.put_json(columns::VOTES, vote.id.as_bytes(), &vote)?;
                if batch.add(vote).is_err() {
                    break;
                }
            }
            Ok::<_, GovernanceError>((attempt, batch))
        })
    }

    pub fn relayer_transaction(&self, tx_hash: &Hash) -> Result<RelayerTransaction> {
        self.db
            .get_json(columns::RELAYER_TXS, tx_hash.as_bytes())?
            .ok_or(GovernanceError::RelayerTxNotFound(*tx_hash))
    }

    pub fn pending_transactions(&self) -> Result<Vec<RelayerTransaction>> {
        let txs: Vec<RelayerTransaction> = self.db.scan_json(columns::RELAYER_TXS)?;
        Ok(txs
            .into_iter()
            .filter(|t| t.status == RelayerTxStatus::Pending)
            .collect())
    }

    /// Settle up to `batch_size` due votes in one transaction.
    ///
    /// Returns `None` when nothing is due. On a submission error every vote
    /// in the batch is rescheduled with backoff, or failed once it has used
    /// up `max_retries` attempts. Concurrent flushes take disjoint votes.
    pub async fn flush_batch(&self, now: u64) -> Result<Option<RelayerTransaction>> {
        let (attempt, batch) = self.claim_batch(now)?;
        if batch.is_empty() {
            return Ok(None);
        }

        let data = match batch.call_data() {
            Ok(data) => data,
            Err(e) => {
                self.release(attempt, &batch)?;
                return Err(CryptoError::from(e).into());
            }
        };
        let request = TransactionRequest {
            from: self.config.relayer_address,
            to: self.config.settlement_contract,
            data,
            value: 0,
            gas_limit: batch.gas_limit(),
            gas_price: self.config.gas_price,
        };
        let vote_ids: Vec<Uuid> = batch.votes().iter().map(|v| v.id).collect();

        match self.chain.submit_transaction(&request).await {
            Ok(tx_hash) => {
                let relayer_tx = RelayerTransaction {
                    tx_hash,
                    from: request.from,
                    to: request.to,
                    gas_price: request.gas_price,
                    gas_limit: request.gas_limit,
                    gas_used: None,
                    function_name: SETTLEMENT_FUNCTION.to_string(),
                    votes_count: vote_ids.len() as u32,
                    vote_ids: vote_ids.clone(),
                    status: RelayerTxStatus::Pending,
                    block_number: None,
                    submitted_at: now,
                };
                let relayer = self.config.relayer_address;
                self.db.update(|txn| {
                    for id in &vote_ids {
                        let mut vote = load_vote(txn, id)?;
                        if !vote.is_claimed_by(attempt) {
                            warn!(vote_id = %vote.id, tx_hash = %tx_hash, "Vote claim lost during submission");
                            continue;
                        }
                        vote.status = VoteStatus::Submitted;
                        vote.claim = None;
                        vote.attempts += 1;
                        vote.relayer = Some(relayer);
                        vote.settlement_tx_hash = Some(tx_hash);
                        txn.put_json(columns::VOTES, id.as_bytes(), &vote)?;
                    }
                    txn.put_json(columns::RELAYER_TXS, tx_hash.as_bytes(), &relayer_tx)?;
                    Ok::<_, GovernanceError>(())
                })?;

                info!(
                    tx_hash = %tx_hash,
                    votes = relayer_tx.votes_count,
                    gas_limit = relayer_tx.gas_limit,
                    "Settlement batch submitted"
                );
                Ok(Some(relayer_tx))
            }
            Err(e) => {
                warn!(votes = vote_ids.len(), error = %e, "Settlement submission failed");
                let reason = e.to_string();
                self.db.update(|txn| {
                    for id in &vote_ids {
                        let mut vote = load_vote(txn, id)?;
                        if !vote.is_claimed_by(attempt) {
                            continue;
                        }
                        vote.attempts += 1;
                        self.reschedule(&mut vote, &reason, now);
                        txn.put_json(columns::VOTES, id.as_bytes(), &vote)?;
                    }
                    Ok::<_, GovernanceError>(())
                })?;
                Err(e.into())
            }
        }
    }

    /// Hand claimed votes back untouched.
    fn release(&self, attempt: Uuid, batch: &VoteBatch) -> Result<()> {
        self.db.update(|txn| {
            for vote in batch.votes() {
                let mut stored = load_vote(txn, &vote.id)?;
                if stored.is_claimed_by(attempt) {
                    stored.status = VoteStatus::Pending;
                    stored.claim = None;
                    txn.put_json(columns::VOTES, vote.id.as_bytes(), &stored)?;
                }
            }
            Ok::<_, GovernanceError>(())
        })
    }

    /// Check the receipt of one settlement transaction and apply it.
    ///
    /// When another reconcile settled the same transaction first this one
    /// reports `AlreadyFinal` and changes nothing.
    pub async fn reconcile(&self, tx_hash: &Hash, now: u64) -> Result<ReconcileOutcome> {
        let tx = self.relayer_transaction(tx_hash)?;
        if tx.status != RelayerTxStatus::Pending {
            return Ok(ReconcileOutcome::AlreadyFinal);
        }

        let receipt = self.chain.get_receipt(tx_hash).await?;

        let outcome = match receipt {
            Some(receipt) if receipt.status == ReceiptStatus::Success => {
                let share = gas_share(receipt.gas_used, tx.vote_ids.len());
                let block = Some(receipt.block_number);
                let applied = self.finish(&tx, RelayerTxStatus::Confirmed, block, Some(receipt.gas_used), |vote| {
                    vote.status = VoteStatus::Confirmed;
                    vote.block_number = block;
                    vote.gas_used = Some(share);
                    vote.gas_saved = Some(gas_saved(share));
                })?;
                if !applied {
                    return Ok(ReconcileOutcome::AlreadyFinal);
                }
                info!(
                    tx_hash = %tx_hash,
                    block = receipt.block_number,
                    gas_used = receipt.gas_used,
                    "Settlement confirmed"
                );
                ReconcileOutcome::Confirmed {
                    block_number: receipt.block_number,
                    gas_used: receipt.gas_used,
                }
            }
            Some(receipt) => {
                let block = Some(receipt.block_number);
                let applied = self.finish(&tx, RelayerTxStatus::Failed, block, Some(receipt.gas_used), |vote| {
                    vote.status = VoteStatus::Failed;
                    vote.failure_reason = Some("settlement reverted".to_string());
                })?;
                if !applied {
                    return Ok(ReconcileOutcome::AlreadyFinal);
                }
                warn!(tx_hash = %tx_hash, "Settlement reverted");
                ReconcileOutcome::Reverted
            }
            None if now >= tx.submitted_at.saturating_add(self.config.confirmation_timeout_seconds) =>
            {
                let applied = self.finish(&tx, RelayerTxStatus::Failed, None, None, |vote| {
                    self.reschedule(vote, "confirmation timeout", now);
                })?;
                if !applied {
                    return Ok(ReconcileOutcome::AlreadyFinal);
                }
                warn!(tx_hash = %tx_hash, submitted_at = tx.submitted_at, "Settlement timed out");
                ReconcileOutcome::TimedOut
            }
            None => {
                debug!(tx_hash = %tx_hash, "Settlement still pending");
                ReconcileOutcome::StillPending
            }
        };

        Ok(outcome)
    }

    /// Reconcile every pending settlement. Chain errors on one transaction
    /// are logged and leave it pending.
    pub async fn reconcile_pending(&self, now: u64) -> Result<Vec<(Hash, ReconcileOutcome)>> {
        let mut outcomes = Vec::new();
        for tx in self.pending_transactions()? {
            match self.reconcile(&tx.tx_hash, now).await {
                Ok(outcome) => outcomes.push((tx.tx_hash, outcome)),
                Err(GovernanceError::Chain(e)) => {
                    warn!(tx_hash = %tx.tx_hash, error = %e, "Receipt lookup failed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    /// Settle `tx` and its votes. Returns false if it was no longer pending.
    fn finish<F>(
        &self,
        tx: &RelayerTransaction,
        status: RelayerTxStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
        mut apply: F,
    ) -> Result<bool>
    where
        F: FnMut(&mut SignedVote),
    {
        self.db.update(|txn| {
            let current: Option<RelayerTransaction> =
                txn.get_json(columns::RELAYER_TXS, tx.tx_hash.as_bytes())?;
            if current.map_or(true, |t| t.status != RelayerTxStatus::Pending) {
                return Ok(false);
            }
            for id in &tx.vote_ids {
                let mut vote = load_vote(txn, id)?;
                if vote.status != VoteStatus::Submitted || vote.settlement_tx_hash != Some(tx.tx_hash) {
                    continue;
                }
                apply(&mut vote);
                txn.put_json(columns::VOTES, id.as_bytes(), &vote)?;
            }
            let mut updated = tx.clone();
            updated.status = status;
            updated.block_number = block_number;
            updated.gas_used = gas_used;
            txn.put_json(columns::RELAYER_TXS, tx.tx_hash.as_bytes(), &updated)?;
            Ok::<_, GovernanceError>(true)
        })
    }

    /// Put a vote back in the queue with backoff, or fail it for good.
    fn reschedule(&self, vote: &mut SignedVote, reason: &str, now: u64) {
        vote.failure_reason = Some(reason.to_string());
        if vote.attempts >= self.config.max_retries {
            vote.status = VoteStatus::Failed;
            warn!(vote_id = %vote.id, attempts = vote.attempts, "Vote settlement abandoned");
        } else {
            vote.status = VoteStatus::Pending;
            vote.claim = None;
            vote.next_attempt_at = now.saturating_add(self.config.retry_delay(vote.attempts));
        }
    }
}

fn load_vote(txn: &Transaction<'_>, id: &Uuid) -> Result<SignedVote> {
    txn.get_json(columns::VOTES, id.as_bytes())?
        .ok_or_else(|| GovernanceError::VoteNotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use crate::proposal::{ProposalDraft, VotingMode};
    use civitas_crypto::{Keypair, TypedMessage};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const NOW: u64 = 1_000;

    struct Fixture {
        relay: VoteRelay,
        chain: MockChain,
        voter: Keypair,
        proposal_id: u64,
    }

    fn fixture_with(config: GovernanceConfig, mode: VotingMode) -> Fixture {
        let db = Database::in_memory();
        let chain = MockChain::new(NOW);
        let voter = Keypair::from_seed(&[7; 32]);
        let proposal = ProposalStore::new(db.clone())
            .create(
                ProposalDraft {
                    proposer: Address::from_bytes([1; 20]),
                    title: "Fund audit".into(),
                    voting_mode: mode,
                    start_time: NOW,
                    end_time: NOW + 3_600,
                    quorum: 100,
                    snapshot: BTreeMap::from([(voter.address(), 400)]),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();
        let config = Arc::new(config);
        let limiter = RateLimiter::in_memory(config.rate_limit_per_minute, config.rate_limit_per_hour);
        let relay = VoteRelay::new(db, config, Arc::new(chain.clone()), limiter);
        Fixture {
            relay,
            chain,
            voter,
            proposal_id: proposal.id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(GovernanceConfig::default(), VotingMode::Linear)
    }

    fn request(f: &Fixture, nonce: u64, weight: u128) -> VoteRequest {
        let message = VoteMessage {
            proposal_id: f.proposal_id,
            support: Support::For,
            nonce,
            deadline: NOW + 600,
            weight,
        };
        let signature = TypedMessage::from(message.clone()).sign(&f.voter, 1).unwrap();
        VoteRequest {
            proposal_id: f.proposal_id,
            voter: f.voter.address(),
            support: message.support,
            nonce,
            deadline: message.deadline,
            weight,
            signature,
        }
    }

    #[test]
    fn test_accepts_valid_vote() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();
        assert_eq!(vote.status, VoteStatus::Pending);
        assert_eq!(vote.weight, 400);
        assert_eq!(f.relay.vote(&vote.id).unwrap(), vote);
    }

    #[test]
    fn test_tampered_vote_rejected_without_nonce_use() {
        let f = fixture();
        let mut req = request(&f, 1, 0);
        req.support = Support::Against;
        assert!(matches!(
            f.relay.submit_vote(req, NOW),
            Err(GovernanceError::InvalidSignature(_))
        ));
        // nonce 1 still available
        assert!(f.relay.submit_vote(request(&f, 1, 0), NOW).is_ok());
    }

    #[test]
    fn test_signature_for_other_voter_rejected() {
        let f = fixture();
        let mut req = request(&f, 1, 0);
        req.voter = Address::from_bytes([0xee; 20]);
        assert!(matches!(
            f.relay.submit_vote(req, NOW),
            Err(GovernanceError::InvalidSignature(_))
        ));
    }

    #[test]
    fn test_deadline_window() {
        let f = fixture();
        assert!(matches!(
            f.relay.submit_vote(request(&f, 1, 0), NOW + 601),
            Err(GovernanceError::DeadlineExpired { .. })
        ));

        let config = GovernanceConfig {
            signature_deadline_seconds: 60,
            ..Default::default()
        };
        let f = fixture_with(config, VotingMode::Linear);
        assert!(matches!(
            f.relay.submit_vote(request(&f, 1, 0), NOW),
            Err(GovernanceError::DeadlineTooFar { .. })
        ));
    }

    #[test]
    fn test_closed_proposal_rejected() {
        let f = fixture();
        assert!(matches!(
            f.relay.submit_vote(request(&f, 1, 0), NOW + 3_600),
            Err(GovernanceError::VotingClosed(_))
        ));
        assert!(matches!(
            f.relay.submit_vote(request(&f, 1, 0), NOW - 1),
            Err(GovernanceError::VotingClosed(_))
        ));
    }

    #[test]
    fn test_duplicate_vote_consumes_nonce() {
        let f = fixture();
        f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();

        assert!(matches!(
            f.relay.submit_vote(request(&f, 2, 0), NOW),
            Err(GovernanceError::DuplicateVote { .. })
        ));
        assert!(matches!(
            f.relay.submit_vote(request(&f, 2, 0), NOW),
            Err(GovernanceError::ReplayedNonce { nonce: 2, .. })
        ));
    }

    #[test]
    fn test_quadratic_weight() {
        let f = fixture_with(GovernanceConfig::default(), VotingMode::Quadratic);
        assert!(matches!(
            f.relay.submit_vote(request(&f, 1, 21), NOW),
            Err(GovernanceError::InsufficientVotingPower { cost: 441, power: 400 })
        ));
        let vote = f.relay.submit_vote(request(&f, 2, 20), NOW).unwrap();
        assert_eq!(vote.weight, 20);
    }

    #[tokio::test]
    async fn test_flush_and_confirm() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();

        let tx = f.relay.flush_batch(NOW).await.unwrap().unwrap();
        assert_eq!(tx.votes_count, 1);
        assert_eq!(f.relay.vote(&vote.id).unwrap().status, VoteStatus::Submitted);
        assert!(f.relay.flush_batch(NOW).await.unwrap().is_none());

        assert_eq!(
            f.relay.reconcile(&tx.tx_hash, NOW + 1).await.unwrap(),
            ReconcileOutcome::StillPending
        );

        f.chain.confirm(&tx.tx_hash);
        assert!(matches!(
            f.relay.reconcile(&tx.tx_hash, NOW + 2).await.unwrap(),
            ReconcileOutcome::Confirmed { .. }
        ));
        let settled = f.relay.vote(&vote.id).unwrap();
        assert_eq!(settled.status, VoteStatus::Confirmed);
        assert_eq!(settled.settlement_tx_hash, Some(tx.tx_hash));
        assert!(settled.gas_saved.unwrap() > 0);
        assert_eq!(
            f.relay.reconcile(&tx.tx_hash, NOW + 3).await.unwrap(),
            ReconcileOutcome::AlreadyFinal
        );
    }

    #[tokio::test]
    async fn test_failed_submission_backs_off() {
        let config = GovernanceConfig {
            max_retries: 2,
            retry_base_seconds: 10,
            ..Default::default()
        };
        let f = fixture_with(config, VotingMode::Linear);
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();

        f.chain.fail_next_submissions(2);
        assert!(matches!(
            f.relay.flush_batch(NOW).await,
            Err(GovernanceError::Chain(_))
        ));
        let retried = f.relay.vote(&vote.id).unwrap();
        assert_eq!(retried.status, VoteStatus::Pending);
        assert_eq!(retried.next_attempt_at, NOW + 10);

        // not due yet
        assert!(f.relay.flush_batch(NOW + 5).await.unwrap().is_none());

        assert!(f.relay.flush_batch(NOW + 10).await.is_err());
        let failed = f.relay.vote(&vote.id).unwrap();
        assert_eq!(failed.status, VoteStatus::Failed);
        assert_eq!(failed.attempts, 2);
    }

    #[tokio::test]
    async fn test_unconfirmed_batch_times_out_and_requeues() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();
        let tx = f.relay.flush_batch(NOW).await.unwrap().unwrap();

        let timeout = GovernanceConfig::default().confirmation_timeout_seconds;
        let outcomes = f.relay.reconcile_pending(NOW + timeout).await.unwrap();
        assert_eq!(outcomes, vec![(tx.tx_hash, ReconcileOutcome::TimedOut)]);

        let requeued = f.relay.vote(&vote.id).unwrap();
        assert_eq!(requeued.status, VoteStatus::Pending);
        assert!(requeued.next_attempt_at > NOW + timeout);
        assert_eq!(
            f.relay.relayer_transaction(&tx.tx_hash).unwrap().status,
            RelayerTxStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_concurrent_flushes_submit_each_vote_once() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();
        f.chain.set_submit_delay(Some(Duration::from_millis(50)));

        let (first, second) = tokio::join!(f.relay.flush_batch(NOW), f.relay.flush_batch(NOW));
        let submitted: Vec<_> = [first.unwrap(), second.unwrap()].into_iter().flatten().collect();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].vote_ids, vec![vote.id]);
        assert_eq!(f.chain.submitted().len(), 1);

        let stored = f.relay.vote(&vote.id).unwrap();
        assert_eq!(stored.status, VoteStatus::Submitted);
        assert_eq!(stored.claim, None);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn test_abandoned_flush_claim_expires() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();
        f.chain.set_submit_delay(Some(Duration::from_millis(200)));

        let abandoned = tokio::time::timeout(Duration::from_millis(20), f.relay.flush_batch(NOW)).await;
        assert!(abandoned.is_err());
        let stuck = f.relay.vote(&vote.id).unwrap();
        assert_eq!(stuck.status, VoteStatus::Submitting);
        assert!(stuck.is_unsettled());

        f.chain.set_submit_delay(None);
        assert!(f.relay.flush_batch(NOW + 1).await.unwrap().is_none());

        let lease = GovernanceConfig::default().confirmation_timeout_seconds;
        let tx = f.relay.flush_batch(NOW + lease).await.unwrap().unwrap();
        assert_eq!(tx.vote_ids, vec![vote.id]);
        assert_eq!(f.chain.submitted().len(), 1);
        assert_eq!(f.relay.vote(&vote.id).unwrap().status, VoteStatus::Submitted);
    }

    #[tokio::test]
    async fn test_reverted_batch_fails_votes() {
        let f = fixture();
        let vote = f.relay.submit_vote(request(&f, 1, 0), NOW).unwrap();
        let tx = f.relay.flush_batch(NOW).await.unwrap().unwrap();
        f.chain.revert(&tx.tx_hash);
        assert_eq!(
            f.relay.reconcile(&tx.tx_hash, NOW).await.unwrap(),
            ReconcileOutcome::Reverted
        );
        assert_eq!(f.relay.vote(&vote.id).unwrap().status, VoteStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_size_caps_settlement() {
        let config = GovernanceConfig {
            batch_size: 2,
            ..Default::default()
        };
        let db = Database::in_memory();
        let chain = MockChain::new(NOW);
        let voters: Vec<Keypair> = (0..3u8).map(|i| Keypair::from_seed(&[i + 10; 32])).collect();
        let proposal = ProposalStore::new(db.clone())
            .create(
                ProposalDraft {
                    title: "Batch".into(),
                    start_time: NOW,
                    end_time: NOW + 100,
                    snapshot: voters.iter().map(|k| (k.address(), 1)).collect(),
                    ..Default::default()
                },
                NOW,
            )
            .unwrap();
        let config = Arc::new(config);
        let relay = VoteRelay::new(db, config, Arc::new(chain.clone()), RateLimiter::in_memory(100, 1_000));

        for voter in &voters {
            let message = VoteMessage {
                proposal_id: proposal.id,
                support: Support::Against,
                nonce: 1,
                deadline: NOW + 50,
                weight: 0,
            };
            let signature = TypedMessage::from(message.clone()).sign(voter, 1).unwrap();
            relay
                .submit_vote(
                    VoteRequest {
                        proposal_id: proposal.id,
                        voter: voter.address(),
                        support: Support::Against,
                        nonce: 1,
                        deadline: NOW + 50,
                        weight: 0,
                        signature,
                    },
                    NOW,
                )
                .unwrap();
        }

        assert_eq!(relay.flush_batch(NOW).await.unwrap().unwrap().votes_count, 2);
        assert_eq!(relay.flush_batch(NOW).await.unwrap().unwrap().votes_count, 1);
        assert_eq!(chain.submitted().len(), 2);
    }
}
