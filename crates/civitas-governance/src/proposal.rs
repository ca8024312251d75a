//! Proposal lifecycle management.
//!
//! Proposals go through states:
//! Pending -> Active -> Succeeded/Defeated, Succeeded -> Queued -> Executed,
//! and Pending/Active/Succeeded/Queued -> Cancelled.
//! Every status change goes through [`ProposalStatus::transition`].

use crate::codec::{columns, proposal_key, u128_string};
use crate::error::{GovernanceError, Result};
use civitas_storage::{Database, Transaction};
use civitas_types::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

const NEXT_PROPOSAL_ID: &[u8] = b"next_proposal_id";

/// Proposal status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Created, voting window not open yet
    Pending,
    /// Voting is open
    Active,
    /// Voting closed with quorum and a majority for
    Succeeded,
    /// Voting closed without quorum or majority
    Defeated,
    /// Handed to the timelock
    Queued,
    Executed,
    Cancelled,
}

impl ProposalStatus {
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Pending, Cancelled)
                | (Active, Succeeded)
                | (Active, Defeated)
                | (Active, Cancelled)
                | (Succeeded, Queued)
                | (Succeeded, Cancelled)
                | (Queued, Executed)
                | (Queued, Cancelled)
        )
    }

    pub fn transition(self, next: ProposalStatus) -> Result<ProposalStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(GovernanceError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProposalStatus::Defeated | ProposalStatus::Executed | ProposalStatus::Cancelled
        )
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Active => "active",
            ProposalStatus::Succeeded => "succeeded",
            ProposalStatus::Defeated => "defeated",
            ProposalStatus::Queued => "queued",
            ProposalStatus::Executed => "executed",
            ProposalStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingMode {
    /// One ballot carries the voter's full snapshot power.
    #[default]
    Linear,
    /// A ballot of `v` votes costs `v²` power.
    Quadratic,
}

/// Call made through the timelock if the proposal passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalAction {
    pub target: Address,
    #[serde(with = "u128_string")]
    pub value: u128,
    #[serde(with = "crate::codec::hex_bytes")]
    pub call_data: Vec<u8>,
    /// Timelock delay; the configured minimum when absent
    #[serde(default)]
    pub delay_seconds: Option<u64>,
    #[serde(default)]
    pub predecessor: Option<Hash>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub proposer: Address,
    pub title: String,
    pub description: String,
    pub category: String,
    pub status: ProposalStatus,
    pub voting_mode: VotingMode,
    #[serde(with = "u128_string")]
    pub votes_for: u128,
    #[serde(with = "u128_string")]
    pub votes_against: u128,
    #[serde(with = "u128_string")]
    pub votes_abstain: u128,
    /// Voting window, unix seconds, `[start_time, end_time)`
    pub start_time: u64,
    pub end_time: u64,
    #[serde(with = "u128_string")]
    pub quorum: u128,
    /// Voting power per address, fixed at creation
    pub snapshot: BTreeMap<Address, u128>,
    pub action: Option<ProposalAction>,
    pub created_at: u64,
}

impl Proposal {
    pub fn set_status(&mut self, next: ProposalStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    pub fn power_of(&self, voter: &Address) -> u128 {
        self.snapshot.get(voter).copied().unwrap_or(0)
    }

    pub fn is_open(&self, now: u64) -> bool {
        self.status == ProposalStatus::Active && now >= self.start_time && now < self.end_time
    }

    pub fn total_votes(&self) -> u128 {
        self.votes_for
            .saturating_add(self.votes_against)
            .saturating_add(self.votes_abstain)
    }
}

/// Input for [`ProposalStore::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalDraft {
    pub proposer: Address,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub voting_mode: VotingMode,
    pub start_time: u64,
    pub end_time: u64,
    #[serde(with = "u128_string")]
    pub quorum: u128,
    pub snapshot: BTreeMap<Address, u128>,
    #[serde(default)]
    pub action: Option<ProposalAction>,
}

/// Proposal registry backed by the store.
#[derive(Clone)]
pub struct ProposalStore {
    db: Database,
}

impl ProposalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create(&self, draft: ProposalDraft, now: u64) -> Result<Proposal> {
        if draft.title.trim().is_empty() {
            return Err(GovernanceError::InvalidProposal("title is empty".into()));
        }
        if draft.end_time <= draft.start_time {
            return Err(GovernanceError::InvalidProposal(
                "end_time must be after start_time".into(),
            ));
        }
        if draft.end_time <= now {
            return Err(GovernanceError::InvalidProposal("voting window already over".into()));
        }

        let proposal = self.db.update(|txn| {
            let id: u64 = txn
                .get_json(columns::META, NEXT_PROPOSAL_ID)?
                .unwrap_or(1);
            txn.put_json(columns::META, NEXT_PROPOSAL_ID, &(id + 1))?;

            let status = if draft.start_time <= now {
                ProposalStatus::Active
            } else {
                ProposalStatus::Pending
            };

            let proposal = Proposal {
                id,
                proposer: draft.proposer,
                title: draft.title,
                description: draft.description,
                category: draft.category,
                status,
                voting_mode: draft.voting_mode,
                votes_for: 0,
                votes_against: 0,
                votes_abstain: 0,
                start_time: draft.start_time,
                end_time: draft.end_time,
                quorum: draft.quorum,
                snapshot: draft.snapshot,
                action: draft.action,
                created_at: now,
            };
            save(txn, &proposal)?;
            Ok::<_, GovernanceError>(proposal)
        })?;

        info!(
            proposal_id = proposal.id,
            status = %proposal.status,
            end_time = proposal.end_time,
            "Proposal created"
        );
        Ok(proposal)
    }

    pub fn get(&self, id: u64) -> Result<Proposal> {
        self.db
            .get_json(columns::PROPOSALS, &proposal_key(id))?
            .ok_or(GovernanceError::ProposalNotFound(id))
    }

    pub fn all(&self) -> Result<Vec<Proposal>> {
        Ok(self.db.scan_json(columns::PROPOSALS)?)
    }

    pub fn by_status(&self, status: ProposalStatus) -> Result<Vec<Proposal>> {
        Ok(self.all()?.into_iter().filter(|p| p.status == status).collect())
    }

    /// Pending -> Active for one proposal whose window has opened.
    pub fn activate(&self, id: u64, now: u64) -> Result<Proposal> {
        self.db.update(|txn| {
            let mut proposal = load(txn, id)?;
            if now < proposal.start_time {
                return Err(GovernanceError::ProposalNotActive {
                    id,
                    status: proposal.status.to_string(),
                });
            }
            proposal.set_status(ProposalStatus::Active)?;
            save(txn, &proposal)?;
            Ok(proposal)
        })
    }

    /// Activate every pending proposal whose window has opened.
    pub fn activate_due(&self, now: u64) -> Result<Vec<u64>> {
        self.db.update(|txn| {
            let mut activated = Vec::new();
            for mut proposal in txn.scan_json::<Proposal>(columns::PROPOSALS)? {
                if proposal.status == ProposalStatus::Pending && now >= proposal.start_time {
                    proposal.set_status(ProposalStatus::Active)?;
                    save(txn, &proposal)?;
                    activated.push(proposal.id);
                }
            }
            Ok::<_, GovernanceError>(activated)
        })
    }
}

pub(crate) fn load(txn: &Transaction<'_>, id: u64) -> Result<Proposal> {
    txn.get_json(columns::PROPOSALS, &proposal_key(id))?
        .ok_or(GovernanceError::ProposalNotFound(id))
}

pub(crate) fn save(txn: &mut Transaction<'_>, proposal: &Proposal) -> Result<()> {
    txn.put_json(columns::PROPOSALS, &proposal_key(proposal.id), proposal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn draft(start: u64, end: u64) -> ProposalDraft {
        ProposalDraft {
            proposer: Address::from_bytes([1; 20]),
            title: "Raise grants budget".into(),
            description: "Move 5% of treasury to grants".into(),
            category: "treasury".into(),
            voting_mode: VotingMode::Linear,
            start_time: start,
            end_time: end,
            quorum: 1_000,
            snapshot: BTreeMap::from([(Address::from_bytes([0xaa; 20]), 600)]),
            action: None,
        }
    }

    #[test]
    fn test_transition_table() {
        use ProposalStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Succeeded));
        assert!(Succeeded.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Executed));

        assert!(!Executed.can_transition_to(Queued));
        assert!(!Defeated.can_transition_to(Queued));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Active.can_transition_to(Executed));
        assert!(matches!(
            Executed.transition(Cancelled),
            Err(GovernanceError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let store = ProposalStore::new(Database::in_memory());
        let p1 = store.create(draft(100, 200), 100).unwrap();
        let p2 = store.create(draft(100, 200), 100).unwrap();
        assert_eq!(p1.id, 1);
        assert_eq!(p2.id, 2);
        assert_eq!(p1.status, ProposalStatus::Active);
        assert_eq!(store.get(2).unwrap(), p2);
    }

    #[test]
    fn test_create_rejects_bad_window() {
        let store = ProposalStore::new(Database::in_memory());
        assert!(store.create(draft(200, 100), 0).is_err());
        assert!(store.create(draft(0, 100), 100).is_err());
        let mut untitled = draft(0, 100);
        untitled.title = "  ".into();
        assert!(store.create(untitled, 0).is_err());
    }

    #[test]
    fn test_future_proposal_starts_pending_and_activates() {
        let store = ProposalStore::new(Database::in_memory());
        let p = store.create(draft(500, 900), 100).unwrap();
        assert_eq!(p.status, ProposalStatus::Pending);

        assert!(store.activate(p.id, 499).is_err());
        assert!(store.activate_due(499).unwrap().is_empty());
        assert_eq!(store.activate_due(500).unwrap(), vec![p.id]);
        assert_eq!(store.get(p.id).unwrap().status, ProposalStatus::Active);
        assert!(store.activate_due(501).unwrap().is_empty());
    }

    #[test]
    fn test_get_missing() {
        let store = ProposalStore::new(Database::in_memory());
        assert_eq!(store.get(42), Err(GovernanceError::ProposalNotFound(42)));
    }

    #[test]
    fn test_snapshot_power() {
        let store = ProposalStore::new(Database::in_memory());
        let p = store.create(draft(0, 100), 0).unwrap();
        assert_eq!(p.power_of(&Address::from_bytes([0xaa; 20])), 600);
        assert_eq!(p.power_of(&Address::from_bytes([0xbb; 20])), 0);
    }
}
