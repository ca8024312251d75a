//! Timelock queue.
//!
//! Approved operations wait a mandatory delay before they can be executed.
//! States: Queued -> Ready -> Executed, Queued|Ready -> Cancelled and
//! Ready -> Expired once the grace period has passed. Ready and Expired are
//! derived from time on every read; [`TimelockQueue::promote_ready`] only
//! persists them.
//!
//! Execute and cancel are mutually exclusive. Execute first places a claim
//! on the operation in a store transaction, then calls the chain from a
//! spawned task that records the outcome even if the caller stops waiting.
//! A cancel that meets a live claim fails with `ExecutionInProgress`, and an
//! execute that meets a cancelled operation fails with
//! `InvalidOperationState`. A claim older than
//! `execution_claim_timeout_seconds` is treated as abandoned.

use crate::chain::{ChainClient, TransactionRequest};
use crate::codec::{columns, event_key, hex_bytes, u128_string};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::proposal::{self, ProposalStatus};
use borsh::BorshSerialize;
use civitas_crypto::{domain, hash_with_domain, CryptoError};
use civitas_storage::{Database, Transaction};
use civitas_types::{Address, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The call an operation performs. Its hash identifies the operation.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, Serialize, Deserialize)]
pub struct OperationCall {
    pub target: Address,
    #[serde(with = "u128_string")]
    pub value: u128,
    #[serde(with = "hex_bytes")]
    pub call_data: Vec<u8>,
    pub predecessor: Option<Hash>,
    pub salt: Hash,
}

impl OperationCall {
    pub fn hash(&self) -> Result<Hash> {
        let encoded = borsh::to_vec(self).map_err(CryptoError::from)?;
        Ok(hash_with_domain(&encoded, domain::OPERATION))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelockStatus {
    Queued,
    Ready,
    Executed,
    Cancelled,
    Expired,
}

impl TimelockStatus {
    pub fn can_transition_to(self, next: TimelockStatus) -> bool {
        use TimelockStatus::*;
        matches!(
            (self, next),
            (Queued, Ready)
                | (Queued, Cancelled)
                | (Queued, Expired)
                | (Ready, Executed)
                | (Ready, Cancelled)
                | (Ready, Expired)
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TimelockStatus::Executed | TimelockStatus::Cancelled | TimelockStatus::Expired
        )
    }
}

impl fmt::Display for TimelockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimelockStatus::Queued => "queued",
            TimelockStatus::Ready => "ready",
            TimelockStatus::Executed => "executed",
            TimelockStatus::Cancelled => "cancelled",
            TimelockStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// In-flight execution marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionClaim {
    pub executor: Address,
    pub claimed_at: u64,
}

impl ExecutionClaim {
    pub fn is_live(&self, now: u64, lease: u64) -> bool {
        now < self.claimed_at.saturating_add(lease)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockOperation {
    pub operation_hash: Hash,
    pub proposal_id: Option<u64>,
    pub call: OperationCall,
    pub delay_seconds: u64,
    pub queued_at: u64,
    /// Earliest execution time
    pub eta: u64,
    pub status: TimelockStatus,
    pub execution_claim: Option<ExecutionClaim>,
    pub executed_at: Option<u64>,
    pub executed_by: Option<Address>,
    pub execution_tx_hash: Option<Hash>,
    pub cancelled_at: Option<u64>,
    pub cancelled_by: Option<Address>,
    pub cancel_reason: Option<String>,
}

impl TimelockOperation {
    /// Effective status at `now`.
    pub fn status_at(&self, now: u64, grace_period: Option<u64>) -> TimelockStatus {
        match self.status {
            TimelockStatus::Queued | TimelockStatus::Ready => {
                if now < self.eta {
                    TimelockStatus::Queued
                } else if grace_period.is_some_and(|g| now >= self.eta.saturating_add(g)) {
                    TimelockStatus::Expired
                } else {
                    TimelockStatus::Ready
                }
            }
            settled => settled,
        }
    }

    fn has_live_claim(&self, now: u64, lease: u64) -> bool {
        self.execution_claim.is_some_and(|c| c.is_live(now, lease))
    }

    /// Drop a claim whose lease ran out. Returns true if one was dropped.
    fn clear_stale_claim(&mut self, now: u64, lease: u64) -> bool {
        match self.execution_claim {
            Some(claim) if !claim.is_live(now, lease) => {
                warn!(
                    operation = %self.operation_hash,
                    executor = %claim.executor,
                    claimed_at = claim.claimed_at,
                    "Dropping stale execution claim"
                );
                self.execution_claim = None;
                true
            }
            _ => false,
        }
    }

    fn set_status(&mut self, next: TimelockStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(GovernanceError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelockEventKind {
    Queued,
    Executed,
    Cancelled,
    EmergencyCancel,
}

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelockEvent {
    pub operation_hash: Hash,
    pub seq: u32,
    pub kind: TimelockEventKind,
    pub actor: Option<Address>,
    pub tx_hash: Option<Hash>,
    pub reason: Option<String>,
    pub timestamp: u64,
}

#[derive(Clone)]
pub struct TimelockQueue {
    db: Database,
    config: Arc<GovernanceConfig>,
    chain: Arc<dyn ChainClient>,
}

impl TimelockQueue {
    pub fn new(db: Database, config: Arc<GovernanceConfig>, chain: Arc<dyn ChainClient>) -> Self {
        Self { db, config, chain }
    }

    /// Queue `call` with `delay_seconds`. Delays outside the configured
    /// bounds are rejected, never clamped. A linked proposal moves to Queued
    /// in the same transaction.
    pub fn queue(
        &self,
        call: OperationCall,
        proposal_id: Option<u64>,
        delay_seconds: u64,
        now: u64,
    ) -> Result<TimelockOperation> {
        let (min, max) = (self.config.min_delay_seconds, self.config.max_delay_seconds);
        if delay_seconds < min || delay_seconds > max {
            return Err(GovernanceError::DelayOutOfRange {
                delay: delay_seconds,
                min,
                max,
            });
        }

        let operation_hash = call.hash()?;
        let operation = TimelockOperation {
            operation_hash,
            proposal_id,
            call,
            delay_seconds,
            queued_at: now,
            eta: now.saturating_add(delay_seconds),
            status: TimelockStatus::Queued,
            execution_claim: None,
            executed_at: None,
            executed_by: None,
            execution_tx_hash: None,
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        };

        self.db.update(|txn| {
            if txn.contains(columns::TIMELOCK_OPERATIONS, operation_hash.as_bytes())? {
                return Err(GovernanceError::OperationExists(operation_hash));
            }
            if let Some(id) = proposal_id {
                let mut proposal = proposal::load(txn, id)?;
                proposal.set_status(ProposalStatus::Queued)?;
                proposal::save(txn, &proposal)?;
            }
            save(txn, &operation)?;
            append_event(txn, &operation_hash, TimelockEventKind::Queued, None, None, None, now)?;
            Ok(())
        })?;

        info!(
            operation = %operation_hash,
            eta = operation.eta,
            delay_seconds,
            ?proposal_id,
            "Operation queued"
        );
        Ok(operation)
    }

    pub fn operation(&self, operation_hash: &Hash) -> Result<TimelockOperation> {
        self.db
            .get_json(columns::TIMELOCK_OPERATIONS, operation_hash.as_bytes())?
            .ok_or(GovernanceError::OperationNotFound(*operation_hash))
    }

    pub fn status(&self, operation_hash: &Hash, now: u64) -> Result<TimelockStatus> {
        Ok(self
            .operation(operation_hash)?
            .status_at(now, self.config.grace_period_seconds))
    }

    pub fn events(&self, operation_hash: &Hash) -> Result<Vec<TimelockEvent>> {
        Ok(self
            .db
            .scan_prefix_json(columns::TIMELOCK_EVENTS, operation_hash.as_bytes())?)
    }

    /// Persist time-derived statuses. Returns the operations that changed.
    pub fn promote_ready(&self, now: u64) -> Result<Vec<(Hash, TimelockStatus)>> {
        let grace = self.config.grace_period_seconds;
        let lease = self.config.execution_claim_timeout_seconds;
        self.db.update(|txn| {
            let mut changed = Vec::new();
            for mut op in txn.scan_json::<TimelockOperation>(columns::TIMELOCK_OPERATIONS)? {
                let effective = op.status_at(now, grace);
                // an operation being executed keeps its status until the outcome is known
                if effective == op.status || op.has_live_claim(now, lease) {
                    continue;
                }
                op.clear_stale_claim(now, lease);
                op.set_status(effective)?;
                save(txn, &op)?;
                changed.push((op.operation_hash, effective));
            }
            Ok::<_, GovernanceError>(changed)
        })
    }

    /// Execute a ready operation as `caller`.
    pub async fn execute(
        &self,
        operation_hash: &Hash,
        caller: &Address,
        now: u64,
    ) -> Result<TimelockOperation> {
        if !self.config.executors.contains(caller) {
            return Err(GovernanceError::Unauthorized(*caller));
        }
        let claimed = self.claim(operation_hash, caller, now)?;

        let queue = self.clone();
        let caller = *caller;
        let settle = tokio::spawn(async move { queue.settle_execution(claimed, caller, now).await });
        match settle.await {
            Ok(outcome) => outcome,
            // the claim stays until its lease runs out
            Err(e) => Err(GovernanceError::ExecutionFailed(e.to_string())),
        }
    }

    fn claim(&self, operation_hash: &Hash, caller: &Address, now: u64) -> Result<TimelockOperation> {
        let grace = self.config.grace_period_seconds;
        let lease = self.config.execution_claim_timeout_seconds;

        self.db.update(|txn| {
            let mut op = load(txn, operation_hash)?;
            if op.has_live_claim(now, lease) {
                return Err(GovernanceError::ExecutionInProgress(*operation_hash));
            }
            op.clear_stale_claim(now, lease);
            match op.status_at(now, grace) {
                TimelockStatus::Ready => {}
                TimelockStatus::Queued => {
                    return Err(GovernanceError::NotReady { eta: op.eta, now });
                }
                other => {
                    return Err(GovernanceError::InvalidOperationState {
                        hash: *operation_hash,
                        status: other.to_string(),
                    });
                }
            }
            if let Some(predecessor) = op.call.predecessor {
                let done = txn
                    .get_json::<TimelockOperation>(columns::TIMELOCK_OPERATIONS, predecessor.as_bytes())?
                    .is_some_and(|p| p.status == TimelockStatus::Executed);
                if !done {
                    return Err(GovernanceError::PredecessorNotExecuted(predecessor));
                }
            }
            op.set_status(TimelockStatus::Ready)?;
            op.execution_claim = Some(ExecutionClaim {
                executor: *caller,
                claimed_at: now,
            });
            save(txn, &op)?;
            Ok(op)
        })
    }

    /// Send the claimed call and record what happened. Only the holder of the
    /// claim may record an outcome.
    async fn settle_execution(
        &self,
        claimed: TimelockOperation,
        caller: Address,
        now: u64,
    ) -> Result<TimelockOperation> {
        let operation_hash = claimed.operation_hash;
        let claim = claimed.execution_claim;
        let request = TransactionRequest {
            from: caller,
            to: claimed.call.target,
            data: claimed.call.call_data.clone(),
            value: claimed.call.value,
            gas_limit: self.config.execution_gas_limit,
            gas_price: self.config.gas_price,
        };

        match self.chain.submit_transaction(&request).await {
            Ok(tx_hash) => {
                let executed = self.db.update(|txn| {
                    let mut op = load(txn, &operation_hash)?;
                    if op.execution_claim != claim {
                        warn!(operation = %operation_hash, tx_hash = %tx_hash, "Execution claim lost before the outcome was recorded");
                        return Err(GovernanceError::InvalidOperationState {
                            hash: operation_hash,
                            status: op.status.to_string(),
                        });
                    }
                    op.set_status(TimelockStatus::Executed)?;
                    op.execution_claim = None;
                    op.executed_at = Some(now);
                    op.executed_by = Some(caller);
                    op.execution_tx_hash = Some(tx_hash);
                    save(txn, &op)?;

                    if let Some(id) = op.proposal_id {
                        let mut proposal = proposal::load(txn, id)?;
                        if proposal.status == ProposalStatus::Queued {
                            proposal.set_status(ProposalStatus::Executed)?;
                            proposal::save(txn, &proposal)?;
                        }
                    }
                    append_event(
                        txn,
                        &operation_hash,
                        TimelockEventKind::Executed,
                        Some(caller),
                        Some(tx_hash),
                        None,
                        now,
                    )?;
                    Ok::<_, GovernanceError>(op)
                })?;

                info!(operation = %operation_hash, executor = %caller, tx_hash = %tx_hash, "Operation executed");
                Ok(executed)
            }
            Err(e) => {
                self.db.update(|txn| {
                    let mut op = load(txn, &operation_hash)?;
                    if op.execution_claim == claim {
                        op.execution_claim = None;
                        save(txn, &op)?;
                    }
                    Ok::<_, GovernanceError>(())
                })?;
                warn!(operation = %operation_hash, error = %e, "Operation execution failed");
                Err(GovernanceError::ExecutionFailed(e.to_string()))
            }
        }
    }

    /// Cancel a queued or ready operation.
    ///
    /// Cancellers log `cancelled`, guardians log `emergency_cancel`.
    pub fn cancel(
        &self,
        operation_hash: &Hash,
        caller: &Address,
        reason: Option<String>,
        now: u64,
    ) -> Result<TimelockOperation> {
        let kind = if self.config.cancellers.contains(caller) {
            TimelockEventKind::Cancelled
        } else if self.config.guardians.contains(caller) {
            TimelockEventKind::EmergencyCancel
        } else {
            return Err(GovernanceError::Unauthorized(*caller));
        };
        let grace = self.config.grace_period_seconds;
        let lease = self.config.execution_claim_timeout_seconds;

        let cancelled = self.db.update(|txn| {
            let mut op = load(txn, operation_hash)?;
            if op.has_live_claim(now, lease) {
                return Err(GovernanceError::ExecutionInProgress(*operation_hash));
            }
            op.clear_stale_claim(now, lease);
            let effective = op.status_at(now, grace);
            if effective.is_final() {
                return Err(GovernanceError::InvalidOperationState {
                    hash: *operation_hash,
                    status: effective.to_string(),
                });
            }
            op.set_status(TimelockStatus::Cancelled)?;
            op.cancelled_at = Some(now);
            op.cancelled_by = Some(*caller);
            op.cancel_reason = reason.clone();
            save(txn, &op)?;

            if let Some(id) = op.proposal_id {
                let mut proposal = proposal::load(txn, id)?;
                if proposal.status.can_transition_to(ProposalStatus::Cancelled) {
                    proposal.set_status(ProposalStatus::Cancelled)?;
                    proposal::save(txn, &proposal)?;
                }
            }
            append_event(txn, operation_hash, kind, Some(*caller), None, reason.clone(), now)?;
            Ok(op)
        })?;

        info!(operation = %operation_hash, by = %caller, ?kind, "Operation cancelled");
        Ok(cancelled)
    }
}

fn load(txn: &Transaction<'_>, operation_hash: &Hash) -> Result<TimelockOperation> {
    txn.get_json(columns::TIMELOCK_OPERATIONS, operation_hash.as_bytes())?
        .ok_or(GovernanceError::OperationNotFound(*operation_hash))
}

fn save(txn: &mut Transaction<'_>, op: &TimelockOperation) -> Result<()> {
    txn.put_json(columns::TIMELOCK_OPERATIONS, op.operation_hash.as_bytes(), op)?;
    Ok(())
}

fn append_event(
    txn: &mut Transaction<'_>,
    operation_hash: &Hash,
    kind: TimelockEventKind,
    actor: Option<Address>,
    tx_hash: Option<Hash>,
    reason: Option<String>,
    timestamp: u64,
) -> Result<()> {
    let seq = txn
        .scan_prefix(columns::TIMELOCK_EVENTS, operation_hash.as_bytes())?
        .len() as u32;
    let event = TimelockEvent {
        operation_hash: *operation_hash,
        seq,
        kind,
        actor,
        tx_hash,
        reason,
        timestamp,
    };
    txn.put_json(columns::TIMELOCK_EVENTS, &event_key(operation_hash, seq), &event)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockChain;
    use std::time::Duration;

    const DAY: u64 = 86_400;

    fn who(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn queue_with(chain: &MockChain) -> TimelockQueue {
        let config = GovernanceConfig {
            executors: vec![who(1)],
            cancellers: vec![who(2)],
            guardians: vec![who(3)],
            ..Default::default()
        };
        TimelockQueue::new(Database::in_memory(), Arc::new(config), Arc::new(chain.clone()))
    }

    fn call(salt: u8) -> OperationCall {
        OperationCall {
            target: who(0xcc),
            value: 0,
            call_data: vec![0xab],
            predecessor: None,
            salt: Hash::from_bytes([salt; 32]),
        }
    }

    #[test]
    fn test_operation_hash_covers_salt() {
        assert_ne!(call(1).hash().unwrap(), call(2).hash().unwrap());
        assert_eq!(call(1).hash().unwrap(), call(1).hash().unwrap());
    }

    #[test]
    fn test_delay_bounds_are_enforced() {
        let queue = queue_with(&MockChain::new(0));
        assert!(matches!(
            queue.queue(call(1), None, DAY, 0),
            Err(GovernanceError::DelayOutOfRange { .. })
        ));
        assert!(matches!(
            queue.queue(call(1), None, 31 * DAY, 0),
            Err(GovernanceError::DelayOutOfRange { .. })
        ));
        let op = queue.queue(call(1), None, 2 * DAY, 100).unwrap();
        assert_eq!(op.eta, 100 + 2 * DAY);
        assert_eq!(
            queue.queue(call(1), None, 2 * DAY, 100),
            Err(GovernanceError::OperationExists(op.operation_hash))
        );
        assert_eq!(queue.events(&op.operation_hash).unwrap().len(), 1);
    }

    #[test]
    fn test_status_follows_time() {
        let queue = queue_with(&MockChain::new(0));
        let op = queue.queue(call(1), None, 2 * DAY, 0).unwrap();
        let hash = op.operation_hash;
        assert_eq!(queue.status(&hash, 2 * DAY - 1).unwrap(), TimelockStatus::Queued);
        assert_eq!(queue.status(&hash, 2 * DAY).unwrap(), TimelockStatus::Ready);
        assert_eq!(queue.status(&hash, 16 * DAY).unwrap(), TimelockStatus::Expired);

        assert_eq!(queue.promote_ready(2 * DAY).unwrap(), vec![(hash, TimelockStatus::Ready)]);
        assert!(queue.promote_ready(2 * DAY).unwrap().is_empty());
        assert_eq!(queue.operation(&hash).unwrap().status, TimelockStatus::Ready);
    }

    #[tokio::test]
    async fn test_execute_after_eta() {
        let chain = MockChain::new(0);
        let queue = queue_with(&chain);
        let hash = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;

        assert_eq!(
            queue.execute(&hash, &who(1), 2 * DAY - 1).await,
            Err(GovernanceError::NotReady { eta: 2 * DAY, now: 2 * DAY - 1 })
        );
        assert_eq!(
            queue.execute(&hash, &who(9), 2 * DAY + 1).await,
            Err(GovernanceError::Unauthorized(who(9)))
        );

        let op = queue.execute(&hash, &who(1), 2 * DAY + 1).await.unwrap();
        assert_eq!(op.status, TimelockStatus::Executed);
        assert!(op.execution_tx_hash.is_some());
        assert_eq!(chain.submitted().len(), 1);

        assert!(matches!(
            queue.execute(&hash, &who(1), 2 * DAY + 2).await,
            Err(GovernanceError::InvalidOperationState { .. })
        ));
        let kinds: Vec<_> = queue.events(&hash).unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![TimelockEventKind::Queued, TimelockEventKind::Executed]);
    }

    #[tokio::test]
    async fn test_failed_execution_releases_claim() {
        let chain = MockChain::new(0);
        let queue = queue_with(&chain);
        let hash = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;

        chain.fail_next_submissions(1);
        assert!(matches!(
            queue.execute(&hash, &who(1), 2 * DAY).await,
            Err(GovernanceError::ExecutionFailed(_))
        ));
        let op = queue.operation(&hash).unwrap();
        assert_eq!(op.execution_claim, None);
        assert_eq!(op.status_at(2 * DAY, Some(14 * DAY)), TimelockStatus::Ready);

        assert!(queue.execute(&hash, &who(1), 2 * DAY).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_execute_still_records_outcome() {
        let chain = MockChain::new(0);
        chain.set_submit_delay(Some(Duration::from_millis(200)));
        let queue = queue_with(&chain);
        let hash = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), queue.execute(&hash, &who(1), 2 * DAY))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(
            queue.cancel(&hash, &who(2), None, 2 * DAY),
            Err(GovernanceError::ExecutionInProgress(hash))
        );

        tokio::time::sleep(Duration::from_millis(500)).await;
        let op = queue.operation(&hash).unwrap();
        assert_eq!(op.status, TimelockStatus::Executed);
        assert_eq!(op.execution_claim, None);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_stops_blocking() {
        let chain = MockChain::new(0);
        let queue = queue_with(&chain);
        let a = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;
        let b = queue.queue(call(2), None, 2 * DAY, 0).unwrap().operation_hash;
        // claims left behind by a process that died mid-execution
        for hash in [a, b] {
            queue
                .db
                .update(|txn| {
                    let mut op = load(txn, &hash)?;
                    op.execution_claim = Some(ExecutionClaim {
                        executor: who(1),
                        claimed_at: 2 * DAY,
                    });
                    save(txn, &op)
                })
                .unwrap();
        }
        let lease = queue.config.execution_claim_timeout_seconds;

        assert_eq!(
            queue.cancel(&a, &who(2), None, 2 * DAY + 1),
            Err(GovernanceError::ExecutionInProgress(a))
        );
        assert_eq!(
            queue.execute(&b, &who(1), 2 * DAY + 1).await,
            Err(GovernanceError::ExecutionInProgress(b))
        );
        assert!(queue.promote_ready(2 * DAY + 1).unwrap().is_empty());

        let later = 2 * DAY + lease;
        let cancelled = queue.cancel(&a, &who(2), None, later).unwrap();
        assert_eq!(cancelled.status, TimelockStatus::Cancelled);
        assert_eq!(cancelled.execution_claim, None);

        let executed = queue.execute(&b, &who(1), later).await.unwrap();
        assert_eq!(executed.status, TimelockStatus::Executed);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_cannot_execute() {
        let queue = queue_with(&MockChain::new(0));
        let hash = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;
        assert!(matches!(
            queue.execute(&hash, &who(1), 16 * DAY).await,
            Err(GovernanceError::InvalidOperationState { .. })
        ));
    }

    #[tokio::test]
    async fn test_predecessor_must_execute_first() {
        let queue = queue_with(&MockChain::new(0));
        let first = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;
        let mut second = call(2);
        second.predecessor = Some(first);
        let second = queue.queue(second, None, 2 * DAY, 0).unwrap().operation_hash;

        assert_eq!(
            queue.execute(&second, &who(1), 2 * DAY).await,
            Err(GovernanceError::PredecessorNotExecuted(first))
        );
        queue.execute(&first, &who(1), 2 * DAY).await.unwrap();
        queue.execute(&second, &who(1), 2 * DAY).await.unwrap();
    }

    #[test]
    fn test_cancel_roles() {
        let queue = queue_with(&MockChain::new(0));
        let a = queue.queue(call(1), None, 2 * DAY, 0).unwrap().operation_hash;
        let b = queue.queue(call(2), None, 2 * DAY, 0).unwrap().operation_hash;

        assert_eq!(
            queue.cancel(&a, &who(1), None, 10),
            Err(GovernanceError::Unauthorized(who(1)))
        );

        queue.cancel(&a, &who(2), Some("superseded".into()), 10).unwrap();
        queue.cancel(&b, &who(3), None, 10).unwrap();

        assert_eq!(queue.events(&a).unwrap()[1].kind, TimelockEventKind::Cancelled);
        assert_eq!(queue.events(&b).unwrap()[1].kind, TimelockEventKind::EmergencyCancel);
        assert_eq!(
            queue.operation(&a).unwrap().cancel_reason.as_deref(),
            Some("superseded")
        );

        assert!(matches!(
            queue.cancel(&a, &who(2), None, 11),
            Err(GovernanceError::InvalidOperationState { .. })
        ));
    }

    #[test]
    fn test_transition_table() {
        use TimelockStatus::*;
        assert!(Queued.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Executed));
        assert!(!Queued.can_transition_to(Executed));
        assert!(!Executed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Ready));
    }
}
