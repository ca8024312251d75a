//! Per-address nonce registry shared by votes and approvals.
//!
//! A nonce is accepted only if it is strictly greater than the address's
//! current nonce; acceptance advances the current nonce to it. Reads and the
//! advance happen inside one store transaction, so concurrent submissions
//! for the same address are serialized.

use crate::codec::columns;
use crate::error::{GovernanceError, Result};
use civitas_storage::{Database, Transaction};
use civitas_types::Address;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub address: Address,
    /// Highest accepted nonce; 0 when nothing was accepted yet
    pub current_nonce: u64,
    /// Nonce consumed by the most recent accepted submission
    pub last_nonce_used: Option<u64>,
    pub updated_at: u64,
}

impl NonceRecord {
    fn fresh(address: Address) -> Self {
        Self {
            address,
            current_nonce: 0,
            last_nonce_used: None,
            updated_at: 0,
        }
    }
}

#[derive(Clone)]
pub struct NonceRegistry {
    db: Database,
}

impl NonceRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Reserve `nonce` for `address` in its own transaction.
    pub fn reserve(&self, address: &Address, nonce: u64, now: u64) -> Result<NonceRecord> {
        self.db.update(|txn| reserve_in(txn, address, nonce, now))
    }

    pub fn current(&self, address: &Address) -> Result<u64> {
        let record: Option<NonceRecord> = self.db.get_json(columns::NONCES, address.as_bytes())?;
        Ok(record.map(|r| r.current_nonce).unwrap_or(0))
    }

    pub fn record(&self, address: &Address) -> Result<Option<NonceRecord>> {
        Ok(self.db.get_json(columns::NONCES, address.as_bytes())?)
    }
}

/// Reserve `nonce` inside a larger transaction.
///
/// `nonce == current` is a replay, `nonce < current` is stale. Both leave the
/// record untouched.
pub fn reserve_in(
    txn: &mut Transaction<'_>,
    address: &Address,
    nonce: u64,
    now: u64,
) -> Result<NonceRecord> {
    let mut record: NonceRecord = txn
        .get_json(columns::NONCES, address.as_bytes())?
        .unwrap_or_else(|| NonceRecord::fresh(*address));

    if nonce == record.current_nonce {
        return Err(GovernanceError::ReplayedNonce {
            address: *address,
            nonce,
        });
    }
    if nonce < record.current_nonce {
        return Err(GovernanceError::StaleNonce {
            address: *address,
            nonce,
            current: record.current_nonce,
        });
    }

    record.current_nonce = nonce;
    record.last_nonce_used = Some(nonce);
    record.updated_at = now;
    txn.put_json(columns::NONCES, address.as_bytes(), &record)?;

    debug!(address = %address, nonce, "Nonce reserved");
    Ok(record)
}
