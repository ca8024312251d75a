//! Pipeline facade.
//!
//! [`Governance`] wires the registry, relay, tally, multisig ledger and
//! timelock around one store and one chain client. Every entry point reads
//! "now" from the chain. Notable outcomes are published on a broadcast
//! channel for metrics and other observers.

use crate::chain::ChainClient;
use crate::config::GovernanceConfig;
use crate::error::{ErrorKind, GovernanceError, Result};
use crate::multisig::{ApprovalRequest, ApprovalStatus, MultisigLedger, PendingOperation};
use crate::nonce::NonceRegistry;
use crate::proposal::{Proposal, ProposalAction, ProposalDraft, ProposalStatus, ProposalStore};
use crate::rate_limit::RateLimiter;
use crate::relay::{ReconcileOutcome, VoteRelay, VoteRequest};
use crate::tally::{Tallier, TallyResult};
use crate::timelock::{
    OperationCall, TimelockEvent, TimelockOperation, TimelockQueue, TimelockStatus,
};
use crate::vote::SignedVote;
use civitas_crypto::{SignatureVerifier, TimelockAction, TimelockActionMessage, Verification};
use civitas_storage::Database;
use civitas_types::{Address, Hash, SignatureEnvelope, Support};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    VoteAccepted { vote_id: Uuid, proposal_id: u64 },
    RequestRejected { endpoint: &'static str, kind: ErrorKind },
    BatchSubmitted { tx_hash: Hash, votes: u32 },
    BatchSubmissionFailed,
    BatchConfirmed { tx_hash: Hash, gas_used: u64 },
    BatchReverted { tx_hash: Hash },
    BatchTimedOut { tx_hash: Hash },
    ProposalFinalized { proposal_id: u64, status: ProposalStatus },
    ApprovalRecorded { operation_hash: Hash, approvals: usize, threshold: usize },
    OperationQueued { operation_hash: Hash, eta: u64 },
    OperationExecuted { operation_hash: Hash, tx_hash: Option<Hash> },
    OperationCancelled { operation_hash: Hash, emergency: bool },
}

/// Signed request for a privileged timelock call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockActionRequest {
    pub operation_hash: Hash,
    pub caller: Address,
    pub signature: SignatureEnvelope,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    #[serde(flatten)]
    pub status: ApprovalStatus,
    /// Set when this approval completed the threshold and queued the operation
    pub queued: Option<TimelockOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockView {
    pub operation: TimelockOperation,
    /// Status at the time of the query
    pub status: TimelockStatus,
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub now: u64,
    pub activated: usize,
    pub batches_submitted: usize,
    pub reconciled: usize,
    pub finalized: usize,
    pub registered: usize,
    /// Approved operations handed to the timelock by this tick
    pub queued: usize,
    pub promoted: usize,
}

#[derive(Clone)]
pub struct Governance {
    config: Arc<GovernanceConfig>,
    chain: Arc<dyn ChainClient>,
    proposals: ProposalStore,
    nonces: NonceRegistry,
    relay: VoteRelay,
    tallier: Tallier,
    multisig: MultisigLedger,
    timelock: TimelockQueue,
    verifier: SignatureVerifier,
    limiter: RateLimiter,
    events: broadcast::Sender<PipelineEvent>,
}

impl Governance {
    pub fn new(db: Database, config: GovernanceConfig, chain: Arc<dyn ChainClient>) -> Result<Self> {
        let limiter = RateLimiter::in_memory(config.rate_limit_per_minute, config.rate_limit_per_hour);
        Self::with_rate_limiter(db, config, chain, limiter)
    }

    pub fn with_rate_limiter(
        db: Database,
        config: GovernanceConfig,
        chain: Arc<dyn ChainClient>,
        limiter: RateLimiter,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            proposals: ProposalStore::new(db.clone()),
            nonces: NonceRegistry::new(db.clone()),
            relay: VoteRelay::new(db.clone(), config.clone(), chain.clone(), limiter.clone()),
            tallier: Tallier::new(db.clone()),
            multisig: MultisigLedger::new(db.clone(), config.clone(), limiter.clone()),
            timelock: TimelockQueue::new(db, config.clone(), chain.clone()),
            verifier: SignatureVerifier::new(config.chain_id),
            limiter,
            config,
            chain,
            events,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PipelineEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn rejected<T>(&self, endpoint: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            debug!(endpoint, code = e.code(), "Request rejected");
            self.emit(PipelineEvent::RequestRejected {
                endpoint,
                kind: e.kind(),
            });
        }
        result
    }

    /// Current chain block time.
    pub async fn now(&self) -> Result<u64> {
        Ok(self.chain.current_block_time().await?)
    }

    fn check_delay(&self, delay: u64) -> Result<()> {
        let (min, max) = (self.config.min_delay_seconds, self.config.max_delay_seconds);
        if delay < min || delay > max {
            return Err(GovernanceError::DelayOutOfRange { delay, min, max });
        }
        Ok(())
    }

    pub async fn create_proposal(&self, draft: ProposalDraft) -> Result<Proposal> {
        if let Some(delay) = draft.action.as_ref().and_then(|a| a.delay_seconds) {
            self.check_delay(delay)?;
        }
        let now = self.now().await?;
        self.proposals.create(draft, now)
    }

    pub fn proposal(&self, id: u64) -> Result<Proposal> {
        self.proposals.get(id)
    }

    pub async fn submit_vote(&self, request: VoteRequest) -> Result<SignedVote> {
        let now = self.now().await?;
        let vote = self.rejected("vote", self.relay.submit_vote(request, now))?;
        self.emit(PipelineEvent::VoteAccepted {
            vote_id: vote.id,
            proposal_id: vote.proposal_id,
        });
        Ok(vote)
    }

    pub fn vote(&self, id: &Uuid) -> Result<SignedVote> {
        self.relay.vote(id)
    }

    pub fn nonce(&self, address: &Address) -> Result<u64> {
        self.nonces.current(address)
    }

    pub async fn record_onchain_vote(
        &self,
        proposal_id: u64,
        voter: &Address,
        support: Support,
        weight: u128,
    ) -> Result<()> {
        let now = self.now().await?;
        self.tallier
            .record_onchain_vote(proposal_id, voter, support, weight, now)
    }

    pub async fn tally(&self, proposal_id: u64) -> Result<TallyResult> {
        let now = self.now().await?;
        let before = self.proposals.get(proposal_id)?.status;
        let result = self.tallier.tally(proposal_id, now)?;
        if before == ProposalStatus::Active && result.is_final {
            self.emit(PipelineEvent::ProposalFinalized {
                proposal_id,
                status: result.status,
            });
        }
        Ok(result)
    }

    /// Register an operation that is not tied to a proposal.
    pub async fn register_operation(
        &self,
        call: OperationCall,
        delay_seconds: u64,
    ) -> Result<PendingOperation> {
        self.check_delay(delay_seconds)?;
        let now = self.now().await?;
        self.multisig.register(&call, None, delay_seconds, now)
    }

    /// Record a multisig approval; the approval that reaches the threshold
    /// queues the operation in the timelock. The approval stays recorded when
    /// queueing fails; the scheduler retries the hand-off on its next tick.
    pub async fn submit_approval(&self, request: ApprovalRequest) -> Result<ApprovalOutcome> {
        let now = self.now().await?;
        let status = self.rejected("approve", self.multisig.approve(request, now))?;
        self.emit(PipelineEvent::ApprovalRecorded {
            operation_hash: status.operation_hash,
            approvals: status.approvals,
            threshold: status.threshold,
        });

        let queued = if status.approved {
            self.hand_off(&status.operation_hash, now).unwrap_or(None)
        } else {
            None
        };
        Ok(ApprovalOutcome { status, queued })
    }

    fn hand_off(&self, operation_hash: &Hash, now: u64) -> Result<Option<TimelockOperation>> {
        let pending = self.multisig.operation(operation_hash)?;
        match self
            .timelock
            .queue(pending.call(), pending.proposal_id, pending.delay_seconds, now)
        {
            Ok(op) => {
                self.emit(PipelineEvent::OperationQueued {
                    operation_hash: op.operation_hash,
                    eta: op.eta,
                });
                Ok(Some(op))
            }
            Err(GovernanceError::OperationExists(_)) => {
                debug!(operation = %operation_hash, "Operation already queued");
                Ok(None)
            }
            Err(e) => {
                warn!(operation = %operation_hash, error = %e, "Approved operation could not be queued");
                Err(e)
            }
        }
    }

    /// Queued operation, or `NotApproved` while it still collects approvals.
    fn queued_operation(&self, operation_hash: &Hash) -> Result<TimelockOperation> {
        match self.timelock.operation(operation_hash) {
            Err(GovernanceError::OperationNotFound(_)) => {
                self.multisig.operation(operation_hash)?;
                self.multisig.ensure_approved(operation_hash)?;
                Err(GovernanceError::OperationNotFound(*operation_hash))
            }
            other => other,
        }
    }

    pub async fn timelock_status(&self, operation_hash: &Hash) -> Result<TimelockView> {
        let now = self.now().await?;
        let operation = self.queued_operation(operation_hash)?;
        let status = operation.status_at(now, self.config.grace_period_seconds);
        Ok(TimelockView { operation, status })
    }

    pub fn timelock_events(&self, operation_hash: &Hash) -> Result<Vec<TimelockEvent>> {
        self.timelock.events(operation_hash)
    }

    fn verify_action(&self, request: &TimelockActionRequest, action: TimelockAction) -> Result<()> {
        let message = TimelockActionMessage {
            operation_hash: request.operation_hash,
            action,
        };
        if let Verification::Invalid(reason) =
            self.verifier
                .verify(&message.into(), &request.signature, &request.caller)
        {
            return Err(GovernanceError::InvalidSignature(format!("{reason:?}")));
        }
        Ok(())
    }

    pub async fn execute_timelock(&self, request: TimelockActionRequest) -> Result<TimelockOperation> {
        let result = async {
            self.verify_action(&request, TimelockAction::Execute)?;
            self.queued_operation(&request.operation_hash)?;
            let now = self.now().await?;
            self.timelock
                .execute(&request.operation_hash, &request.caller, now)
                .await
        }
        .await;

        let op = self.rejected("execute", result)?;
        self.emit(PipelineEvent::OperationExecuted {
            operation_hash: op.operation_hash,
            tx_hash: op.execution_tx_hash,
        });
        Ok(op)
    }

    pub async fn cancel_timelock(&self, request: TimelockActionRequest) -> Result<TimelockOperation> {
        let result = async {
            self.verify_action(&request, TimelockAction::Cancel)?;
            self.queued_operation(&request.operation_hash)?;
            let now = self.now().await?;
            self.timelock.cancel(
                &request.operation_hash,
                &request.caller,
                request.reason.clone(),
                now,
            )
        }
        .await;

        let op = self.rejected("cancel", result)?;
        self.emit(PipelineEvent::OperationCancelled {
            operation_hash: op.operation_hash,
            emergency: self.config.guardians.contains(&request.caller)
                && !self.config.cancellers.contains(&request.caller),
        });
        Ok(op)
    }

    /// One scheduler pass: activate proposals, settle and reconcile votes,
    /// finalize ended proposals, register passed actions for approval and
    /// promote timelock operations.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.now().await?;
        let mut report = TickReport {
            now,
            ..Default::default()
        };

        report.activated = self.proposals.activate_due(now)?.len();

        loop {
            match self.relay.flush_batch(now).await {
                Ok(Some(tx)) => {
                    report.batches_submitted += 1;
                    self.emit(PipelineEvent::BatchSubmitted {
                        tx_hash: tx.tx_hash,
                        votes: tx.votes_count,
                    });
                }
                Ok(None) => break,
                Err(GovernanceError::Chain(e)) => {
                    warn!(error = %e, "Batch flush stopped");
                    self.emit(PipelineEvent::BatchSubmissionFailed);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        for (tx_hash, outcome) in self.relay.reconcile_pending(now).await? {
            let event = match outcome {
                ReconcileOutcome::Confirmed { gas_used, .. } => {
                    PipelineEvent::BatchConfirmed { tx_hash, gas_used }
                }
                ReconcileOutcome::Reverted => PipelineEvent::BatchReverted { tx_hash },
                ReconcileOutcome::TimedOut => PipelineEvent::BatchTimedOut { tx_hash },
                ReconcileOutcome::StillPending | ReconcileOutcome::AlreadyFinal => continue,
            };
            report.reconciled += 1;
            self.emit(event);
        }

        for result in self.tallier.finalize_ended(now)? {
            report.finalized += 1;
            self.emit(PipelineEvent::ProposalFinalized {
                proposal_id: result.proposal_id,
                status: result.status,
            });
        }

        report.registered = self.register_passed(now)?;
        report.queued = self.queue_approved(now)?;
        report.promoted = self.timelock.promote_ready(now)?.len();
        self.limiter.prune();

        if report != (TickReport { now, ..Default::default() }) {
            info!(
                activated = report.activated,
                batches = report.batches_submitted,
                reconciled = report.reconciled,
                finalized = report.finalized,
                registered = report.registered,
                queued = report.queued,
                promoted = report.promoted,
                "Pipeline tick"
            );
        }
        Ok(report)
    }

    /// Hand every approved operation missing from the timelock to it.
    fn queue_approved(&self, now: u64) -> Result<usize> {
        let mut queued = 0;
        for pending in self.multisig.operations()? {
            let hash = pending.operation_hash;
            match self.timelock.operation(&hash) {
                Ok(_) => continue,
                Err(GovernanceError::OperationNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if !self.multisig.is_approved(&hash)? {
                continue;
            }
            // failures are logged by hand_off and retried next tick
            if let Ok(Some(_)) = self.hand_off(&hash, now) {
                queued += 1;
            }
        }
        Ok(queued)
    }

    /// Register the action of every succeeded proposal with the multisig.
    fn register_passed(&self, now: u64) -> Result<usize> {
        let mut registered = 0;
        for proposal in self.proposals.by_status(ProposalStatus::Succeeded)? {
            let Some(action) = &proposal.action else {
                continue;
            };
            let call = proposal_call(&proposal, action);
            let delay = action.delay_seconds.unwrap_or(self.config.min_delay_seconds);
            match self.multisig.register(&call, Some(proposal.id), delay, now) {
                Ok(_) => registered += 1,
                Err(GovernanceError::OperationExists(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(registered)
    }

    /// Operation hash a proposal's action is registered under.
    pub fn proposal_operation_hash(&self, proposal: &Proposal) -> Result<Option<Hash>> {
        proposal
            .action
            .as_ref()
            .map(|action| proposal_call(proposal, action).hash())
            .transpose()
    }
}

fn proposal_call(proposal: &Proposal, action: &ProposalAction) -> OperationCall {
    OperationCall {
        target: action.target,
        value: action.value,
        call_data: action.call_data.clone(),
        predecessor: action.predecessor,
        salt: Hash::compute(&proposal.id.to_be_bytes()),
    }
}
