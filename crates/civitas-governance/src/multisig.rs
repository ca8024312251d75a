//! Multisig approval ledger.
//!
//! An operation must collect `threshold` approvals from distinct configured
//! signers before it may be queued in the timelock. Each approval is a
//! signed [`ApprovalMessage`] and consumes the signer's nonce.

use crate::codec::{approval_key, columns, hex_bytes, u128_string};
use crate::config::GovernanceConfig;
use crate::error::{GovernanceError, Result};
use crate::nonce::reserve_in;
use crate::rate_limit::RateLimiter;
use crate::timelock::OperationCall;
use civitas_crypto::{ApprovalMessage, SignatureVerifier, Verification};
use civitas_storage::Database;
use civitas_types::{Address, Hash, SignatureEnvelope};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Operation waiting for approvals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub operation_hash: Hash,
    pub proposal_id: Option<u64>,
    pub target: Address,
    #[serde(with = "u128_string")]
    pub value: u128,
    #[serde(with = "hex_bytes")]
    pub call_data: Vec<u8>,
    pub predecessor: Option<Hash>,
    pub salt: Hash,
    pub delay_seconds: u64,
    pub registered_at: u64,
}

impl PendingOperation {
    pub fn call(&self) -> OperationCall {
        OperationCall {
            target: self.target,
            value: self.value,
            call_data: self.call_data.clone(),
            predecessor: self.predecessor,
            salt: self.salt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub operation_hash: Hash,
    pub signer: Address,
    pub nonce: u64,
    pub signature: SignatureEnvelope,
    pub approved_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub operation_hash: Hash,
    pub signer: Address,
    pub nonce: u64,
    pub signature: SignatureEnvelope,
}

/// Approval state after a successful `approve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    pub operation_hash: Hash,
    pub approvals: usize,
    pub threshold: usize,
    pub approved: bool,
}

#[derive(Clone)]
pub struct MultisigLedger {
    db: Database,
    config: Arc<GovernanceConfig>,
    verifier: SignatureVerifier,
    limiter: RateLimiter,
}

impl MultisigLedger {
    pub fn new(db: Database, config: Arc<GovernanceConfig>, limiter: RateLimiter) -> Self {
        Self {
            verifier: SignatureVerifier::new(config.chain_id),
            db,
            config,
            limiter,
        }
    }

    pub fn threshold(&self) -> usize {
        self.config.multisig_threshold
    }

    pub fn is_signer(&self, address: &Address) -> bool {
        self.config.multisig_signers.contains(address)
    }

    /// Register an operation so signers can approve it.
    pub fn register(
        &self,
        call: &OperationCall,
        proposal_id: Option<u64>,
        delay_seconds: u64,
        now: u64,
    ) -> Result<PendingOperation> {
        let operation_hash = call.hash()?;
        let pending = PendingOperation {
            operation_hash,
            proposal_id,
            target: call.target,
            value: call.value,
            call_data: call.call_data.clone(),
            predecessor: call.predecessor,
            salt: call.salt,
            delay_seconds,
            registered_at: now,
        };

        self.db.update(|txn| {
            if txn.contains(columns::PENDING_OPERATIONS, operation_hash.as_bytes())? {
                return Err(GovernanceError::OperationExists(operation_hash));
            }
            txn.put_json(columns::PENDING_OPERATIONS, operation_hash.as_bytes(), &pending)?;
            Ok(())
        })?;

        info!(operation = %operation_hash, ?proposal_id, delay_seconds, "Operation registered for approval");
        Ok(pending)
    }

    pub fn operation(&self, operation_hash: &Hash) -> Result<PendingOperation> {
        self.db
            .get_json(columns::PENDING_OPERATIONS, operation_hash.as_bytes())?
            .ok_or(GovernanceError::OperationNotFound(*operation_hash))
    }

    pub fn operations(&self) -> Result<Vec<PendingOperation>> {
        Ok(self.db.scan_json(columns::PENDING_OPERATIONS)?)
    }

    /// Record one signer's approval.
    ///
    /// Order: signer roster, rate limit, signature, operation registered,
    /// then nonce and uniqueness in one transaction. A repeat approval by
    /// the same signer still consumes its nonce.
    pub fn approve(&self, request: ApprovalRequest, now: u64) -> Result<ApprovalStatus> {
        if !self.is_signer(&request.signer) {
            return Err(GovernanceError::NotASigner(request.signer));
        }

        self.limiter.check_address("approve", &request.signer)?;

        let message = ApprovalMessage {
            operation_hash: request.operation_hash,
            nonce: request.nonce,
        };
        if let Verification::Invalid(reason) =
            self.verifier.verify(&message.into(), &request.signature, &request.signer)
        {
            warn!(signer = %request.signer, ?reason, "Rejected approval signature");
            return Err(GovernanceError::InvalidSignature(format!("{reason:?}")));
        }

        let operation_hash = request.operation_hash;
        let key = approval_key(&operation_hash, &request.signer);

        let (duplicate, approvals) = self.db.update(|txn| {
            if !txn.contains(columns::PENDING_OPERATIONS, operation_hash.as_bytes())? {
                return Err(GovernanceError::OperationNotFound(operation_hash));
            }
            reserve_in(txn, &request.signer, request.nonce, now)?;

            let duplicate = txn.contains(columns::APPROVALS, &key)?;
            if !duplicate {
                let approval = Approval {
                    operation_hash,
                    signer: request.signer,
                    nonce: request.nonce,
                    signature: request.signature,
                    approved_at: now,
                };
                txn.put_json(columns::APPROVALS, &key, &approval)?;
            }
            let approvals = txn
                .scan_prefix(columns::APPROVALS, operation_hash.as_bytes())?
                .len();
            Ok((duplicate, approvals))
        })?;

        if duplicate {
            return Err(GovernanceError::AlreadyApproved {
                operation_hash,
                signer: request.signer,
            });
        }

        let threshold = self.threshold();
        info!(
            operation = %operation_hash,
            signer = %request.signer,
            approvals,
            threshold,
            "Approval recorded"
        );
        Ok(ApprovalStatus {
            operation_hash,
            approvals,
            threshold,
            approved: approvals >= threshold,
        })
    }

    pub fn approvals(&self, operation_hash: &Hash) -> Result<Vec<Approval>> {
        Ok(self
            .db
            .scan_prefix_json(columns::APPROVALS, operation_hash.as_bytes())?)
    }

    pub fn approval_count(&self, operation_hash: &Hash) -> Result<usize> {
        Ok(self
            .db
            .scan_prefix(columns::APPROVALS, operation_hash.as_bytes())?
            .len())
    }

    pub fn is_approved(&self, operation_hash: &Hash) -> Result<bool> {
        Ok(self.approval_count(operation_hash)? >= self.threshold())
    }

    /// Fails with `NotApproved` until the threshold is met.
    pub fn ensure_approved(&self, operation_hash: &Hash) -> Result<()> {
        let approvals = self.approval_count(operation_hash)?;
        let threshold = self.threshold();
        if approvals < threshold {
            return Err(GovernanceError::NotApproved {
                approvals,
                threshold,
            });
        }
        Ok(())
    }
}
