//! Civitas RPC - JSON-RPC API for the governance pipeline.
//!
//! Methods:
//! - `gov_createProposal`, `gov_getProposal`
//! - `gov_submitVote`, `gov_getVote`, `gov_nonce`, `gov_tally`
//! - `gov_registerOperation`, `gov_submitApproval`
//! - `gov_timelockStatus`, `gov_timelockEvents`, `gov_executeTimelock`, `gov_cancelTimelock`
//! - `civitas_health`
//!
//! Governance errors are returned with a code per error kind and
//! `{kind, code}` as error data.

pub mod error;
pub mod server;
pub mod types;

pub use error::{error_codes, ErrorData, RpcError, RpcResult};
pub use server::{rpc_module, GovernanceApiServer, GovernanceRpc, RpcServer, RpcServerConfig};
pub use types::{HealthStatus, VoteReceipt};
