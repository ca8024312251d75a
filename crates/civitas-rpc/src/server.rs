//! RPC server implementation.
//!
//! JSON-RPC over HTTP using jsonrpsee services behind a hyper server. Every
//! method is a thin call into [`Governance`]; errors keep their kind through
//! [`RpcError`]. Each request is first charged against a per-IP rate limit.
//!
//! `gov_createProposal` takes the voting-power snapshot from the caller and
//! `gov_registerOperation` takes an arbitrary call, so both are operator
//! methods: they are only registered when `operator_methods` is set, for a
//! server reachable by trusted callers only.

use crate::error::{RpcError, RpcResult};
use crate::types::{HealthStatus, VoteReceipt};
use civitas_governance::{
    ApprovalOutcome, ApprovalRequest, Governance, GovernanceError, OperationCall,
    PendingOperation, Proposal, ProposalDraft, RateLimiter, SignedVote, TallyResult,
    TimelockActionRequest, TimelockEvent, TimelockOperation, TimelockView, VoteRequest,
};
use civitas_types::{Address, Hash};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn, Service};
use hyper::{Body, Request, Response, StatusCode};
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{stop_channel, Server, ServerHandle};
use jsonrpsee::{Methods, RpcModule};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Methods that trust their caller.
pub const OPERATOR_METHODS: [&str; 2] = ["gov_createProposal", "gov_registerOperation"];

const RATE_LIMIT_SCOPE: &str = "rpc";
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// RPC server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcServerConfig {
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Max request body size
    pub max_body_size: u32,
    /// Max connections
    pub max_connections: u32,
    /// Requests per client IP per minute
    pub requests_per_minute: u32,
    /// Requests per client IP per hour
    pub requests_per_hour: u32,
    /// Register `gov_createProposal` and `gov_registerOperation`
    pub operator_methods: bool,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8645)),
            max_body_size: 1024 * 1024,
            max_connections: 256,
            requests_per_minute: 600,
            requests_per_hour: 10_000,
            operator_methods: false,
        }
    }
}

#[rpc(server)]
pub trait GovernanceApi {
    #[method(name = "gov_createProposal")]
    async fn create_proposal(&self, draft: ProposalDraft) -> RpcResult<Proposal>;

    #[method(name = "gov_getProposal")]
    async fn get_proposal(&self, proposal_id: u64) -> RpcResult<Proposal>;

    #[method(name = "gov_submitVote")]
    async fn submit_vote(&self, request: VoteRequest) -> RpcResult<VoteReceipt>;

    #[method(name = "gov_getVote")]
    async fn get_vote(&self, vote_id: Uuid) -> RpcResult<SignedVote>;

    #[method(name = "gov_nonce")]
    async fn nonce(&self, address: Address) -> RpcResult<u64>;

    #[method(name = "gov_tally")]
    async fn tally(&self, proposal_id: u64) -> RpcResult<TallyResult>;

    #[method(name = "gov_registerOperation")]
    async fn register_operation(
        &self,
        call: OperationCall,
        delay_seconds: u64,
    ) -> RpcResult<PendingOperation>;

    #[method(name = "gov_submitApproval")]
    async fn submit_approval(&self, request: ApprovalRequest) -> RpcResult<ApprovalOutcome>;

    #[method(name = "gov_timelockStatus")]
    async fn timelock_status(&self, operation_hash: Hash) -> RpcResult<TimelockView>;

    #[method(name = "gov_timelockEvents")]
    async fn timelock_events(&self, operation_hash: Hash) -> RpcResult<Vec<TimelockEvent>>;

    #[method(name = "gov_executeTimelock")]
    async fn execute_timelock(&self, request: TimelockActionRequest) -> RpcResult<TimelockOperation>;

    #[method(name = "gov_cancelTimelock")]
    async fn cancel_timelock(&self, request: TimelockActionRequest) -> RpcResult<TimelockOperation>;

    #[method(name = "civitas_health")]
    async fn health(&self) -> RpcResult<HealthStatus>;
}

/// [`GovernanceApiServer`] backed by a [`Governance`] service.
#[derive(Clone)]
pub struct GovernanceRpc {
    governance: Governance,
}

impl GovernanceRpc {
    pub fn new(governance: Governance) -> Self {
        Self { governance }
    }
}

#[async_trait]
impl GovernanceApiServer for GovernanceRpc {
    async fn create_proposal(&self, draft: ProposalDraft) -> RpcResult<Proposal> {
        Ok(self.governance.create_proposal(draft).await?)
    }

    async fn get_proposal(&self, proposal_id: u64) -> RpcResult<Proposal> {
        Ok(self.governance.proposal(proposal_id)?)
    }

    async fn submit_vote(&self, request: VoteRequest) -> RpcResult<VoteReceipt> {
        let vote = self.governance.submit_vote(request).await?;
        Ok(VoteReceipt::from(&vote))
    }

    async fn get_vote(&self, vote_id: Uuid) -> RpcResult<SignedVote> {
        Ok(self.governance.vote(&vote_id)?)
    }

    async fn nonce(&self, address: Address) -> RpcResult<u64> {
        Ok(self.governance.nonce(&address)?)
    }

    async fn tally(&self, proposal_id: u64) -> RpcResult<TallyResult> {
        Ok(self.governance.tally(proposal_id).await?)
    }

    async fn register_operation(
        &self,
        call: OperationCall,
        delay_seconds: u64,
    ) -> RpcResult<PendingOperation> {
        Ok(self.governance.register_operation(call, delay_seconds).await?)
    }

    async fn submit_approval(&self, request: ApprovalRequest) -> RpcResult<ApprovalOutcome> {
        Ok(self.governance.submit_approval(request).await?)
    }

    async fn timelock_status(&self, operation_hash: Hash) -> RpcResult<TimelockView> {
        Ok(self.governance.timelock_status(&operation_hash).await?)
    }

    async fn timelock_events(&self, operation_hash: Hash) -> RpcResult<Vec<TimelockEvent>> {
        Ok(self.governance.timelock_events(&operation_hash)?)
    }

    async fn execute_timelock(&self, request: TimelockActionRequest) -> RpcResult<TimelockOperation> {
        Ok(self.governance.execute_timelock(request).await?)
    }

    async fn cancel_timelock(&self, request: TimelockActionRequest) -> RpcResult<TimelockOperation> {
        Ok(self.governance.cancel_timelock(request).await?)
    }

    async fn health(&self) -> RpcResult<HealthStatus> {
        let block_time = match self.governance.now().await {
            Ok(time) => Some(time),
            Err(e) => {
                warn!(error = %e, "Chain unreachable during health check");
                None
            }
        };
        Ok(HealthStatus {
            status: if block_time.is_some() { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            chain_id: self.governance.config().chain_id,
            block_time,
        })
    }
}

/// Build the RPC module. Operator methods are left out unless asked for.
pub fn rpc_module(governance: Governance, operator_methods: bool) -> RpcModule<GovernanceRpc> {
    let mut module = GovernanceRpc::new(governance).into_rpc();
    if !operator_methods {
        // jsonrpsee 0.22 has no method removal; rebuild the table without them.
        let mut kept = Methods::new();
        for name in module.method_names().filter(|name| !OPERATOR_METHODS.contains(name)) {
            let callback = module.method(name).cloned().expect("listed method is registered");
            kept.verify_and_insert(name, callback).expect("method names are unique");
        }
        *module = kept;
    }
    module
}

/// JSON-RPC error body for a request turned away before dispatch.
fn rate_limited(error: GovernanceError) -> Response<Body> {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "error": RpcError::from(error).to_error_object(),
        "id": null,
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// RPC server.
pub struct RpcServer {
    config: RpcServerConfig,
    governance: Governance,
    limiter: RateLimiter,
    handle: Option<ServerHandle>,
    pruner: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, governance: Governance) -> Self {
        let limiter = RateLimiter::in_memory(config.requests_per_minute, config.requests_per_hour);
        Self {
            config,
            governance,
            limiter,
            handle: None,
            pruner: None,
            local_addr: None,
        }
    }

    /// Start the RPC server.
    pub async fn start(&mut self) -> Result<SocketAddr, RpcError> {
        let methods: Methods = rpc_module(self.governance.clone(), self.config.operator_methods).into();
        let (stop_handle, handle) = stop_channel();
        let svc_builder = Server::builder()
            .max_request_body_size(self.config.max_body_size)
            .max_connections(self.config.max_connections)
            .to_service_builder();

        let limiter = self.limiter.clone();
        let conn_stop = stop_handle.clone();
        let make_service = make_service_fn(move |conn: &AddrStream| {
            let remote_ip: IpAddr = conn.remote_addr().ip();
            let methods = methods.clone();
            let stop_handle = conn_stop.clone();
            let svc_builder = svc_builder.clone();
            let limiter = limiter.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let admitted = limiter.check_ip(RATE_LIMIT_SCOPE, remote_ip);
                    let mut svc = svc_builder.clone().build(methods.clone(), stop_handle.clone());
                    async move {
                        if let Err(e) = admitted {
                            debug!(ip = %remote_ip, "RPC request rate limited");
                            return Ok::<_, BoxError>(rate_limited(e));
                        }
                        svc.call(req).await
                    }
                }))
            }
        });

        let server = hyper::Server::try_bind(&self.config.http_addr)
            .map_err(|e| RpcError::InternalError(format!("Failed to bind HTTP server: {}", e)))?
            .serve(make_service);
        let addr = server.local_addr();

        let server = server.with_graceful_shutdown(async move { stop_handle.shutdown().await });
        tokio::spawn(async move {
            if let Err(e) = server.await {
                warn!(error = %e, "RPC server error");
            }
        });

        let limiter = self.limiter.clone();
        self.pruner = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                limiter.prune();
            }
        }));
        self.handle = Some(handle);
        self.local_addr = Some(addr);

        info!(%addr, operator_methods = self.config.operator_methods, "RPC server started");
        Ok(addr)
    }

    /// Stop the RPC server.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.stop() {
                warn!("RPC server stop failed: {}", e);
            }
        }
        if let Some(pruner) = self.pruner.take() {
            pruner.abort();
        }
        self.local_addr = None;
        info!("RPC server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_server_config() {
        let config = RpcServerConfig::default();
        assert_eq!(config.http_addr.to_string(), "127.0.0.1:8645");
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: RpcServerConfig =
            serde_json::from_str(r#"{"http_addr":"0.0.0.0:9000"}"#).unwrap();
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.max_connections, 256);
        assert!(!config.operator_methods);
    }
}
