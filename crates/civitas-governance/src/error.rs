use crate::chain::ChainError;
use civitas_crypto::CryptoError;
use civitas_storage::StorageError;
use civitas_types::{Address, Hash};
use thiserror::Error;

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input or state; rejected with no state change.
    Validation,
    /// Reused or stale nonce, duplicate vote or approval.
    Replay,
    /// Chain submission or confirmation failure.
    Settlement,
    /// Lost an atomic transition, or the operation is not in the right state yet.
    StateConflict,
    /// Out-of-range parameter or unknown signer.
    Configuration,
    /// Persistence unavailable; fatal to the request only.
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Replay => "replay",
            ErrorKind::Settlement => "settlement",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Storage => "storage",
        }
    }
}

/// Errors that can occur in governance operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error("Proposal {id} is not active (status: {status})")]
    ProposalNotActive { id: u64, status: String },

    #[error("Voting closed for proposal {0}")]
    VotingClosed(u64),

    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Signature deadline {deadline} has passed (now {now})")]
    DeadlineExpired { deadline: u64, now: u64 },

    #[error("Signature deadline {deadline} is beyond the allowed horizon {max}")]
    DeadlineTooFar { deadline: u64, max: u64 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("No voting power for {0}")]
    NoVotingPower(Address),

    #[error("Insufficient voting power: cost {cost} exceeds {power}")]
    InsufficientVotingPower { cost: u128, power: u128 },

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(Address),

    #[error("Vote not found: {0}")]
    VoteNotFound(String),

    #[error("Operation not found: {0}")]
    OperationNotFound(Hash),

    #[error("Relayer transaction not found: {0}")]
    RelayerTxNotFound(Hash),

    #[error("Replayed nonce {nonce} for {address}")]
    ReplayedNonce { address: Address, nonce: u64 },

    #[error("Stale nonce {nonce} for {address} (current {current})")]
    StaleNonce { address: Address, nonce: u64, current: u64 },

    #[error("Duplicate vote by {voter} on proposal {proposal_id}")]
    DuplicateVote { proposal_id: u64, voter: Address },

    #[error("{signer} already approved {operation_hash}")]
    AlreadyApproved { operation_hash: Hash, signer: Address },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Operation not ready: eta {eta}, now {now}")]
    NotReady { eta: u64, now: u64 },

    #[error("Operation {hash} is {status}")]
    InvalidOperationState { hash: Hash, status: String },

    #[error("Execution of {0} is in progress")]
    ExecutionInProgress(Hash),

    #[error("Operation already exists: {0}")]
    OperationExists(Hash),

    #[error("Operation not approved: {approvals} of {threshold} approvals")]
    NotApproved { approvals: usize, threshold: usize },

    #[error("Predecessor {0} has not been executed")]
    PredecessorNotExecuted(Hash),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Delay {delay}s outside [{min}, {max}]")]
    DelayOutOfRange { delay: u64, min: u64, max: u64 },

    #[error("Not a multisig signer: {0}")]
    NotASigner(Address),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl GovernanceError {
    pub fn kind(&self) -> ErrorKind {
        use GovernanceError::*;
        match self {
            ProposalNotFound(_)
            | ProposalNotActive { .. }
            | VotingClosed(_)
            | InvalidProposal(_)
            | DeadlineExpired { .. }
            | DeadlineTooFar { .. }
            | InvalidSignature(_)
            | NoVotingPower(_)
            | InsufficientVotingPower { .. }
            | RateLimited(_)
            | Unauthorized(_)
            | VoteNotFound(_)
            | OperationNotFound(_)
            | RelayerTxNotFound(_)
            | Crypto(_) => ErrorKind::Validation,

            ReplayedNonce { .. }
            | StaleNonce { .. }
            | DuplicateVote { .. }
            | AlreadyApproved { .. } => ErrorKind::Replay,

            Chain(_) | ExecutionFailed(_) => ErrorKind::Settlement,

            NotReady { .. }
            | InvalidOperationState { .. }
            | ExecutionInProgress(_)
            | OperationExists(_)
            | NotApproved { .. }
            | PredecessorNotExecuted(_)
            | InvalidTransition { .. } => ErrorKind::StateConflict,

            DelayOutOfRange { .. } | NotASigner(_) | InvalidConfig(_) => ErrorKind::Configuration,

            Storage(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable name of the variant.
    pub fn code(&self) -> &'static str {
        use GovernanceError::*;
        match self {
            ProposalNotFound(_) => "ProposalNotFound",
            ProposalNotActive { .. } => "ProposalNotActive",
            VotingClosed(_) => "VotingClosed",
            InvalidProposal(_) => "InvalidProposal",
            DeadlineExpired { .. } => "DeadlineExpired",
            DeadlineTooFar { .. } => "DeadlineTooFar",
            InvalidSignature(_) => "InvalidSignature",
            NoVotingPower(_) => "NoVotingPower",
            InsufficientVotingPower { .. } => "InsufficientVotingPower",
            RateLimited(_) => "RateLimited",
            Unauthorized(_) => "Unauthorized",
            VoteNotFound(_) => "VoteNotFound",
            OperationNotFound(_) => "OperationNotFound",
            RelayerTxNotFound(_) => "RelayerTxNotFound",
            ReplayedNonce { .. } => "ReplayedNonce",
            StaleNonce { .. } => "StaleNonce",
            DuplicateVote { .. } => "DuplicateVote",
            AlreadyApproved { .. } => "AlreadyApproved",
            Chain(_) => "ChainError",
            ExecutionFailed(_) => "ExecutionFailed",
            NotReady { .. } => "NotReady",
            InvalidOperationState { .. } => "InvalidOperationState",
            ExecutionInProgress(_) => "ExecutionInProgress",
            OperationExists(_) => "OperationExists",
            NotApproved { .. } => "NotApproved",
            PredecessorNotExecuted(_) => "PredecessorNotExecuted",
            InvalidTransition { .. } => "InvalidTransition",
            DelayOutOfRange { .. } => "DelayOutOfRange",
            NotASigner(_) => "NotASigner",
            InvalidConfig(_) => "InvalidConfig",
            Storage(_) => "StorageError",
            Crypto(_) => "CryptoError",
        }
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::DelayOutOfRange { delay: 10, min: 60, max: 600 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("[60, 600]"));
    }

    #[test]
    fn test_replay_kinds() {
        let addr = Address::from_bytes([0xaa; 20]);
        assert_eq!(
            GovernanceError::ReplayedNonce { address: addr, nonce: 1 }.kind(),
            ErrorKind::Replay
        );
        assert_eq!(
            GovernanceError::DuplicateVote { proposal_id: 1, voter: addr }.kind(),
            ErrorKind::Replay
        );
        assert_eq!(
            GovernanceError::AlreadyApproved { operation_hash: Hash::ZERO, signer: addr }.kind(),
            ErrorKind::Replay
        );
    }

    #[test]
    fn test_conflict_and_config_kinds() {
        assert_eq!(
            GovernanceError::ExecutionInProgress(Hash::ZERO).kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            GovernanceError::NotReady { eta: 10, now: 9 }.kind(),
            ErrorKind::StateConflict
        );
        assert_eq!(
            GovernanceError::NotASigner(Address::ZERO).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_storage_conversion() {
        let err: GovernanceError = StorageError::Io("disk".into()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.code(), "StorageError");
    }
}
