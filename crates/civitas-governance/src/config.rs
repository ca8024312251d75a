//! Pipeline configuration.

use crate::error::{GovernanceError, Result};
use civitas_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Settings shared by the relay, ledger and timelock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Chain id bound into every signed message
    pub chain_id: u64,

    /// Minimum timelock delay (seconds)
    pub min_delay_seconds: u64,
    /// Maximum timelock delay (seconds)
    pub max_delay_seconds: u64,
    /// How long a ready operation stays executable; `None` keeps it forever
    pub grace_period_seconds: Option<u64>,

    /// Votes per settlement transaction
    pub batch_size: usize,
    /// Scheduler period (seconds)
    pub batch_flush_interval: u64,
    /// Furthest a ballot deadline may be from now (seconds)
    pub signature_deadline_seconds: u64,

    /// Submission attempts before a vote is marked failed
    pub max_retries: u32,
    pub retry_base_seconds: u64,
    pub max_backoff_seconds: u64,
    /// Age after which an unconfirmed settlement is treated as failed (seconds).
    /// Also the lease on votes claimed by a flush that never returned.
    pub confirmation_timeout_seconds: u64,

    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,

    pub multisig_threshold: usize,
    pub multisig_signers: Vec<Address>,

    /// Allowed to execute ready timelock operations
    pub executors: Vec<Address>,
    /// Allowed to cancel queued or ready operations
    pub cancellers: Vec<Address>,
    /// Allowed to emergency-cancel
    pub guardians: Vec<Address>,

    /// Account the relayer submits from
    pub relayer_address: Address,
    /// Contract receiving `castVoteBatch`
    pub settlement_contract: Address,
    pub gas_price: u64,
    /// Gas limit for timelock execution calls
    pub execution_gas_limit: u64,
    /// Lease on an execution claim; an older claim no longer blocks
    /// execute, cancel or promotion (seconds)
    pub execution_claim_timeout_seconds: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            min_delay_seconds: 172_800,
            max_delay_seconds: 2_592_000,
            grace_period_seconds: Some(1_209_600),
            batch_size: 50,
            batch_flush_interval: 30,
            signature_deadline_seconds: 86_400,
            max_retries: 5,
            retry_base_seconds: 15,
            max_backoff_seconds: 900,
            confirmation_timeout_seconds: 600,
            rate_limit_per_minute: 10,
            rate_limit_per_hour: 100,
            multisig_threshold: 1,
            multisig_signers: Vec::new(),
            executors: Vec::new(),
            cancellers: Vec::new(),
            guardians: Vec::new(),
            relayer_address: Address::ZERO,
            settlement_contract: Address::ZERO,
            gas_price: 1_000_000_000,
            execution_gas_limit: 500_000,
            execution_claim_timeout_seconds: 600,
        }
    }
}

impl GovernanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_delay_seconds > self.max_delay_seconds {
            return Err(GovernanceError::InvalidConfig(format!(
                "min_delay_seconds ({}) exceeds max_delay_seconds ({})",
                self.min_delay_seconds, self.max_delay_seconds
            )));
        }

        if self.batch_size == 0 {
            return Err(GovernanceError::InvalidConfig("batch_size cannot be 0".into()));
        }

        if self.batch_flush_interval == 0 {
            return Err(GovernanceError::InvalidConfig(
                "batch_flush_interval cannot be 0".into(),
            ));
        }

        if self.confirmation_timeout_seconds == 0 || self.execution_claim_timeout_seconds == 0 {
            return Err(GovernanceError::InvalidConfig("timeouts cannot be 0".into()));
        }

        if self.max_retries == 0 {
            return Err(GovernanceError::InvalidConfig("max_retries cannot be 0".into()));
        }

        if self.rate_limit_per_minute == 0 || self.rate_limit_per_hour == 0 {
            return Err(GovernanceError::InvalidConfig("rate limits cannot be 0".into()));
        }

        if self.rate_limit_per_minute > self.rate_limit_per_hour {
            return Err(GovernanceError::InvalidConfig(
                "rate_limit_per_minute exceeds rate_limit_per_hour".into(),
            ));
        }

        if self.multisig_threshold == 0 {
            return Err(GovernanceError::InvalidConfig(
                "multisig_threshold cannot be 0".into(),
            ));
        }

        let unique: BTreeSet<&Address> = self.multisig_signers.iter().collect();
        if unique.len() != self.multisig_signers.len() {
            return Err(GovernanceError::InvalidConfig(
                "multisig_signers contains duplicates".into(),
            ));
        }

        if !self.multisig_signers.is_empty() && self.multisig_threshold > self.multisig_signers.len()
        {
            return Err(GovernanceError::InvalidConfig(format!(
                "multisig_threshold ({}) exceeds signer count ({})",
                self.multisig_threshold,
                self.multisig_signers.len()
            )));
        }

        Ok(())
    }

    /// Delay before the next attempt after `attempts` failed submissions.
    pub fn retry_delay(&self, attempts: u32) -> u64 {
        let factor = 1u64.checked_shl(attempts.saturating_sub(1)).unwrap_or(u64::MAX);
        self.retry_base_seconds
            .saturating_mul(factor)
            .min(self.max_backoff_seconds)
    }
}
