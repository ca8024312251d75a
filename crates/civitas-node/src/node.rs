//! Node wiring: storage, chain client, pipeline, RPC, metrics and the
//! scheduler that drives batching, reconciliation and finalization.

use crate::chain_client::HttpChainClient;
use crate::config::NodeConfig;
use crate::metrics::{Metrics, MetricsServer};
use civitas_governance::{ChainClient, Governance};
use civitas_rpc::RpcServer;
use civitas_storage::Database;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Initializing,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl NodeState {
    /// Check if node is active.
    pub fn is_active(&self) -> bool {
        matches!(self, NodeState::Running)
    }
}

/// The Civitas governance node.
pub struct CivitasNode {
    pub config: NodeConfig,
    pub node_state: Arc<RwLock<NodeState>>,
    pub governance: Governance,
    pub metrics: Arc<Metrics>,
    pub rpc_server: Option<RpcServer>,
    tasks: Vec<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
    shutdown: mpsc::Receiver<()>,
}

impl CivitasNode {
    /// Create a node talking to the configured chain endpoint.
    pub async fn new(config: NodeConfig) -> anyhow::Result<(Self, mpsc::Sender<()>)> {
        let chain = HttpChainClient::new(
            config.chain.endpoint.clone(),
            Duration::from_secs(config.chain.request_timeout_seconds),
        )?;
        Self::with_chain(config, Arc::new(chain))
    }

    /// Create a node over any chain client.
    pub fn with_chain(
        config: NodeConfig,
        chain: Arc<dyn ChainClient>,
    ) -> anyhow::Result<(Self, mpsc::Sender<()>)> {
        info!("Initializing Civitas node: {}", config.name);

        let db = if config.storage.in_memory {
            warn!("Using in-memory storage; state is lost on exit");
            Database::in_memory()
        } else {
            Database::open(&config.db_path())?
        };

        let governance = Governance::new(db, config.governance.clone(), chain)?;
        let metrics = Metrics::new()?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (stop_tx, _) = watch::channel(false);

        let node = Self {
            config,
            node_state: Arc::new(RwLock::new(NodeState::Initializing)),
            governance,
            metrics,
            rpc_server: None,
            tasks: Vec::new(),
            stop_tx,
            shutdown: shutdown_rx,
        };

        Ok((node, shutdown_tx))
    }

    /// Start the node.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        info!(chain_id = self.config.governance.chain_id, "Starting Civitas node");
        *self.node_state.write().await = NodeState::Starting;

        let recorder = self.metrics.spawn_recorder(self.governance.subscribe());
        self.tasks.push(recorder);

        if self.config.metrics.enabled {
            self.start_metrics();
        }

        if self.config.rpc.enabled {
            self.start_rpc().await?;
        }

        self.start_scheduler();

        *self.node_state.write().await = NodeState::Running;
        info!("Civitas node started");
        Ok(())
    }

    async fn start_rpc(&mut self) -> anyhow::Result<()> {
        let mut rpc_server = RpcServer::new(self.config.rpc.server_config(), self.governance.clone());
        let addr = rpc_server.start().await?;
        info!(%addr, "RPC server listening");
        self.rpc_server = Some(rpc_server);
        Ok(())
    }

    fn start_metrics(&mut self) {
        let server = MetricsServer::new(self.config.metrics.addr, self.metrics.clone());
        let addr = self.config.metrics.addr;
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!(%addr, "Metrics server failed: {}", e);
            }
        }));
        info!(%addr, "Metrics server started");
    }

    /// Run `Governance::tick` every `batch_flush_interval` seconds.
    fn start_scheduler(&mut self) {
        let governance = self.governance.clone();
        let metrics = self.metrics.clone();
        let period = Duration::from_secs(self.config.governance.batch_flush_interval);
        let mut stop = self.stop_tx.subscribe();

        self.tasks.push(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.changed() => break,
                }

                let started = Instant::now();
                match governance.tick().await {
                    Ok(report) => {
                        metrics.record_tick(&report, started.elapsed());
                        debug!(now = report.now, "Scheduler tick done");
                    }
                    // Chain unreachable or store failure; the next tick retries.
                    Err(e) => warn!(code = e.code(), "Scheduler tick failed: {}", e),
                }
            }
            debug!("Scheduler stopped");
        }));
    }

    /// Run the node (main loop).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("Node is running. Press Ctrl+C to shutdown.");

        tokio::select! {
            _ = self.shutdown.recv() => {
                info!("Shutdown signal received");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Graceful shutdown.
    pub async fn shutdown(&mut self) {
        info!("Shutting down Civitas node...");
        *self.node_state.write().await = NodeState::ShuttingDown;

        let _ = self.stop_tx.send(true);

        if let Some(mut rpc) = self.rpc_server.take() {
            rpc.stop();
        }

        for task in self.tasks.drain(..) {
            task.abort();
        }

        *self.node_state.write().await = NodeState::Stopped;
        info!("Civitas node stopped");
    }

    /// Get node state.
    pub async fn state(&self) -> NodeState {
        *self.node_state.read().await
    }

    /// Check if node is healthy.
    pub async fn is_healthy(&self) -> bool {
        self.state().await.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civitas_crypto::{Keypair, TypedMessage, VoteMessage};
    use civitas_governance::{MockChain, ProposalDraft, VoteRequest, VoteStatus};
    use civitas_types::Support;
    use std::collections::BTreeMap;

    const T0: u64 = 1_700_000_000;

    fn test_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.storage.in_memory = true;
        config.rpc.enabled = false;
        config.governance.batch_flush_interval = 1;
        config
    }

    #[tokio::test]
    async fn test_node_creation() {
        let chain = MockChain::new(T0);
        let (node, _shutdown) = CivitasNode::with_chain(test_config(), Arc::new(chain)).unwrap();
        assert_eq!(node.state().await, NodeState::Initializing);
        assert!(!node.is_healthy().await);
    }

    #[tokio::test]
    async fn test_invalid_governance_config_rejected() {
        let mut config = test_config();
        config.governance.multisig_threshold = 0;
        let chain = MockChain::new(T0);
        assert!(CivitasNode::with_chain(config, Arc::new(chain)).is_err());
    }

    #[test]
    fn test_node_state_is_active() {
        assert!(NodeState::Running.is_active());
        assert!(!NodeState::Stopped.is_active());
        assert!(!NodeState::Initializing.is_active());
    }

    #[tokio::test]
    async fn test_scheduler_settles_votes() {
        let chain = MockChain::new(T0);
        chain.set_auto_confirm(true);
        let (mut node, shutdown) =
            CivitasNode::with_chain(test_config(), Arc::new(chain.clone())).unwrap();

        let voter = Keypair::from_seed(&[5; 32]);
        let mut snapshot = BTreeMap::new();
        snapshot.insert(voter.address(), 10u128);
        let proposal = node
            .governance
            .create_proposal(ProposalDraft {
                proposer: voter.address(),
                title: "Renew the audit retainer".into(),
                start_time: T0,
                end_time: T0 + 3_600,
                quorum: 1,
                snapshot,
                ..Default::default()
            })
            .await
            .unwrap();

        let message = VoteMessage {
            proposal_id: proposal.id,
            support: Support::For,
            nonce: 1,
            deadline: T0 + 600,
            weight: 0,
        };
        let signature = TypedMessage::from(message.clone()).sign(&voter, 1).unwrap();
        let vote = node
            .governance
            .submit_vote(VoteRequest {
                proposal_id: proposal.id,
                voter: voter.address(),
                support: Support::For,
                nonce: 1,
                deadline: message.deadline,
                weight: 0,
                signature,
            })
            .await
            .unwrap();

        node.start().await.unwrap();
        assert!(node.is_healthy().await);

        let mut status = VoteStatus::Pending;
        for _ in 0..50 {
            status = node.governance.vote(&vote.id).unwrap().status;
            if status == VoteStatus::Confirmed && node.metrics.batches_submitted.get() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, VoteStatus::Confirmed);
        assert_eq!(node.metrics.batches_submitted.get(), 1);

        shutdown.send(()).await.unwrap();
        node.run().await.unwrap();
        assert_eq!(node.state().await, NodeState::Stopped);
    }
}
