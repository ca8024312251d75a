//! RPC error types and responses.

use civitas_governance::{ErrorKind, GovernanceError};
use jsonrpsee::types::error::ErrorObjectOwned;
use serde::Serialize;
use thiserror::Error;

/// JSON-RPC error codes.
pub mod error_codes {
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Governance error kinds
    pub const VALIDATION: i32 = -32010;
    pub const REPLAY: i32 = -32011;
    pub const SETTLEMENT: i32 = -32012;
    pub const STATE_CONFLICT: i32 = -32013;
    pub const CONFIGURATION: i32 = -32014;
    pub const STORAGE: i32 = -32015;
}

pub fn kind_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Validation => error_codes::VALIDATION,
        ErrorKind::Replay => error_codes::REPLAY,
        ErrorKind::Settlement => error_codes::SETTLEMENT,
        ErrorKind::StateConflict => error_codes::STATE_CONFLICT,
        ErrorKind::Configuration => error_codes::CONFIGURATION,
        ErrorKind::Storage => error_codes::STORAGE,
    }
}

/// Machine-readable part of a governance error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorData {
    pub kind: &'static str,
    pub code: &'static str,
}

/// RPC errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RpcError {
    #[error("{0}")]
    Governance(#[from] GovernanceError),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RpcError {
    /// Get the error code.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Governance(e) => kind_code(e.kind()),
            RpcError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RpcError::InternalError(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn data(&self) -> Option<ErrorData> {
        match self {
            RpcError::Governance(e) => Some(ErrorData {
                kind: e.kind().as_str(),
                code: e.code(),
            }),
            _ => None,
        }
    }

    /// Convert to JSON-RPC error object.
    pub fn to_error_object(&self) -> ErrorObjectOwned {
        ErrorObjectOwned::owned(self.code(), self.to_string(), self.data())
    }
}

impl From<RpcError> for ErrorObjectOwned {
    fn from(err: RpcError) -> Self {
        err.to_error_object()
    }
}

/// Standard RPC result type.
pub type RpcResult<T> = Result<T, RpcError>;
