//! Vote tallying.
//!
//! Totals are derived from confirmed relayed ballots plus ballots cast
//! directly on-chain. Once the voting window has closed and every relayed
//! ballot has settled, the first tally finalizes the proposal and stores the
//! totals; every later call returns the stored result unchanged.

use crate::codec::{ballot_key, columns, proposal_key};
use crate::error::{GovernanceError, Result};
use crate::proposal::{self, Proposal, ProposalStatus};
use crate::vote::{Ballot, SignedVote, VoteStatus};
use civitas_storage::{Database, Transaction};
use civitas_types::{Address, Support};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    pub proposal_id: u64,
    pub status: ProposalStatus,
    #[serde(with = "crate::codec::u128_string")]
    pub votes_for: u128,
    #[serde(with = "crate::codec::u128_string")]
    pub votes_against: u128,
    #[serde(with = "crate::codec::u128_string")]
    pub votes_abstain: u128,
    #[serde(with = "crate::codec::u128_string")]
    pub quorum: u128,
    /// False while the voting window is still open or relayed ballots are
    /// still settling
    pub is_final: bool,
    /// Relayed ballots not yet confirmed or failed
    #[serde(default)]
    pub unsettled_votes: u64,
}

impl TallyResult {
    fn from_proposal(proposal: &Proposal, is_final: bool) -> Self {
        Self {
            proposal_id: proposal.id,
            status: proposal.status,
            votes_for: proposal.votes_for,
            votes_against: proposal.votes_against,
            votes_abstain: proposal.votes_abstain,
            quorum: proposal.quorum,
            is_final,
            unsettled_votes: 0,
        }
    }

    fn with_unsettled(mut self, unsettled: u64) -> Self {
        self.unsettled_votes = unsettled;
        self
    }
}

#[derive(Default)]
struct Totals {
    for_: u128,
    against: u128,
    abstain: u128,
    unsettled: u64,
}

impl Totals {
    fn add(&mut self, support: Support, weight: u128) {
        let slot = match support {
            Support::For => &mut self.for_,
            Support::Against => &mut self.against,
            Support::Abstain => &mut self.abstain,
        };
        *slot = slot.saturating_add(weight);
    }

    fn total(&self) -> u128 {
        self.for_.saturating_add(self.against).saturating_add(self.abstain)
    }
}

#[derive(Clone)]
pub struct Tallier {
    db: Database,
}

impl Tallier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Tally a proposal at `now`.
    ///
    /// An active proposal whose window has closed becomes Succeeded when
    /// turnout reaches quorum and `for > against`, Defeated otherwise. While
    /// any relayed ballot is still pending or in flight the result stays a
    /// preview and the proposal stays Active.
    pub fn tally(&self, proposal_id: u64, now: u64) -> Result<TallyResult> {
        self.db.update(|txn| {
            let mut proposal = proposal::load(txn, proposal_id)?;

            match proposal.status {
                ProposalStatus::Pending => {
                    return Ok(TallyResult::from_proposal(&proposal, false));
                }
                ProposalStatus::Active => {}
                // already finalized
                _ => return Ok(TallyResult::from_proposal(&proposal, true)),
            }

            let totals = count(txn, proposal_id)?;
            proposal.votes_for = totals.for_;
            proposal.votes_against = totals.against;
            proposal.votes_abstain = totals.abstain;

            let preview = TallyResult::from_proposal(&proposal, false).with_unsettled(totals.unsettled);
            if now < proposal.end_time {
                return Ok(preview);
            }
            if totals.unsettled > 0 {
                debug!(
                    proposal_id,
                    unsettled = totals.unsettled,
                    "Finalization waits for relayed votes to settle"
                );
                return Ok(preview);
            }

            let passed = totals.total() >= proposal.quorum && totals.for_ > totals.against;
            let outcome = if passed {
                ProposalStatus::Succeeded
            } else {
                ProposalStatus::Defeated
            };
            proposal.set_status(outcome)?;
            proposal::save(txn, &proposal)?;

            info!(
                proposal_id,
                status = %proposal.status,
                votes_for = %proposal.votes_for,
                votes_against = %proposal.votes_against,
                votes_abstain = %proposal.votes_abstain,
                "Proposal finalized"
            );
            Ok::<_, GovernanceError>(TallyResult::from_proposal(&proposal, true))
        })
    }

    /// Finalize every active proposal whose window closed before `now`.
    ///
    /// Returns only the proposals finalized by this call; ones still waiting
    /// on relayed ballots are retried next time.
    pub fn finalize_ended(&self, now: u64) -> Result<Vec<TallyResult>> {
        let proposals: Vec<Proposal> = self.db.scan_json(columns::PROPOSALS)?;
        let mut finalized = Vec::new();
        for p in proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Active && now >= p.end_time)
        {
            let result = self.tally(p.id, now)?;
            if result.is_final {
                finalized.push(result);
            }
        }
        Ok(finalized)
    }

    /// Record a ballot cast directly against the settlement contract.
    ///
    /// Shares the (proposal, voter) slot with relayed ballots, so a voter
    /// counts once whichever path they used.
    pub fn record_onchain_vote(
        &self,
        proposal_id: u64,
        voter: &Address,
        support: Support,
        weight: u128,
        now: u64,
    ) -> Result<()> {
        self.db.update(|txn| {
            let proposal = proposal::load(txn, proposal_id)?;
            if !proposal.is_open(now) {
                return Err(GovernanceError::VotingClosed(proposal_id));
            }
            let slot = ballot_key(proposal_id, voter);
            if txn.contains(columns::BALLOTS, &slot)? {
                return Err(GovernanceError::DuplicateVote {
                    proposal_id,
                    voter: *voter,
                });
            }
            txn.put_json(
                columns::BALLOTS,
                &slot,
                &Ballot::OnChain {
                    support,
                    weight,
                    recorded_at: now,
                },
            )?;
            Ok(())
        })
    }
}

fn count(txn: &Transaction<'_>, proposal_id: u64) -> Result<Totals> {
    let mut totals = Totals::default();
    let ballots: Vec<Ballot> = txn.scan_prefix_json(columns::BALLOTS, &proposal_key(proposal_id))?;

    for ballot in ballots {
        match ballot {
            Ballot::OnChain { support, weight, .. } => totals.add(support, weight),
            Ballot::Relayed { vote_id } => {
                let vote: Option<SignedVote> = txn.get_json(columns::VOTES, vote_id.as_bytes())?;
                match vote {
                    Some(vote) if vote.status == VoteStatus::Confirmed => {
                        totals.add(vote.support, vote.weight)
                    }
                    Some(vote) if vote.is_unsettled() => totals.unsettled += 1,
                    _ => {}
                }
            }
        }
    }
    Ok(totals)
}
