//! Civitas Governance - DAO execution pipeline.
//!
//! This crate provides:
//! - Proposal registry and lifecycle
//! - Gasless vote relay with batched settlement
//! - Vote tally (linear and quadratic)
//! - Multisig approval ledger
//! - Timelock queue with guarded execution and cancellation
//!
//! Every component persists through one [`civitas_storage::Database`] and
//! reaches the chain only through [`ChainClient`].

pub mod batch;
pub mod chain;
pub mod codec;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod multisig;
pub mod nonce;
pub mod proposal;
pub mod rate_limit;
pub mod relay;
pub mod service;
pub mod tally;
pub mod timelock;
pub mod vote;
pub mod voting;

pub use chain::{ChainClient, ChainError, Receipt, ReceiptStatus, TransactionRequest};
pub use config::GovernanceConfig;
pub use error::{ErrorKind, GovernanceError, Result};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockChain;
pub use multisig::{ApprovalRequest, ApprovalStatus, MultisigLedger, PendingOperation};
pub use nonce::{NonceRecord, NonceRegistry};
pub use proposal::{Proposal, ProposalAction, ProposalDraft, ProposalStatus, ProposalStore, VotingMode};
pub use rate_limit::{InMemoryBackend, RateLimitBackend, RateLimiter};
pub use relay::{ReconcileOutcome, VoteRelay, VoteRequest};
pub use service::{
    ApprovalOutcome, Governance, PipelineEvent, TickReport, TimelockActionRequest, TimelockView,
};
pub use tally::{Tallier, TallyResult};
pub use timelock::{
    OperationCall, TimelockEvent, TimelockEventKind, TimelockOperation, TimelockQueue,
    TimelockStatus,
};
pub use vote::{
    Ballot, RelayerTransaction, RelayerTxStatus, SignedVote, SubmissionClaim, VoteStatus,
};
