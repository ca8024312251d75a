//! Node configuration.
//!
//! Handles loading and validation of node configuration from
//! config files and command-line arguments.

use civitas_governance::GovernanceConfig;
use civitas_rpc::RpcServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name
    pub name: String,
    /// Data directory
    pub data_dir: PathBuf,
    /// Pipeline settings
    pub governance: GovernanceConfig,
    /// RPC configuration
    pub rpc: RpcConfig,
    /// Chain endpoint
    pub chain: ChainConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "civitas-node".to_string(),
            data_dir: PathBuf::from("./data"),
            governance: GovernanceConfig::default(),
            rpc: RpcConfig::default(),
            chain: ChainConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file.
    /// Path is validated to prevent directory traversal attacks.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: NodeConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let path_str = path.to_string_lossy();
        if path_str.contains("..") {
            anyhow::bail!("Invalid path: directory traversal detected");
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("Failed to write config file '{}': {}", path.display(), e))?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.governance.validate()?;

        if self.rpc.enabled && self.rpc.http_addr.port() == 0 {
            anyhow::bail!("RPC HTTP port cannot be 0");
        }

        if self.chain.endpoint.trim().is_empty() {
            anyhow::bail!("Chain endpoint cannot be empty");
        }
        if self.chain.request_timeout_seconds == 0 {
            anyhow::bail!("Chain request timeout cannot be 0");
        }

        if self.rpc.requests_per_minute == 0 || self.rpc.requests_per_hour == 0 {
            anyhow::bail!("RPC rate limits cannot be 0");
        }

        if self.metrics.enabled && self.metrics.addr == self.rpc.http_addr {
            anyhow::bail!("Metrics and RPC cannot share {}", self.metrics.addr);
        }

        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => anyhow::bail!("Unknown log format: {}", other),
        }

        Ok(())
    }

    /// Store directory, resolved against the data directory when relative.
    pub fn db_path(&self) -> PathBuf {
        if self.storage.db_path.is_absolute() {
            self.storage.db_path.clone()
        } else {
            self.data_dir.join(&self.storage.db_path)
        }
    }
}

/// RPC configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Enable HTTP RPC
    pub enabled: bool,
    /// HTTP RPC address
    pub http_addr: SocketAddr,
    /// Maximum request body size (KB)
    pub max_body_size: u32,
    pub max_connections: u32,
    /// Requests per client IP per minute
    pub requests_per_minute: u32,
    /// Requests per client IP per hour
    pub requests_per_hour: u32,
    /// Expose `gov_createProposal` and `gov_registerOperation`; enable only
    /// on an address reachable by operators
    pub operator_methods: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        let server = RpcServerConfig::default();
        Self {
            enabled: true,
            http_addr: server.http_addr,
            max_body_size: server.max_body_size / 1024,
            max_connections: server.max_connections,
            requests_per_minute: server.requests_per_minute,
            requests_per_hour: server.requests_per_hour,
            operator_methods: server.operator_methods,
        }
    }
}

impl RpcConfig {
    pub fn server_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            http_addr: self.http_addr,
            max_body_size: self.max_body_size.saturating_mul(1024),
            max_connections: self.max_connections,
            requests_per_minute: self.requests_per_minute,
            requests_per_hour: self.requests_per_hour,
            operator_methods: self.operator_methods,
        }
    }
}

/// Chain node the relayer and executor submit to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL
    pub endpoint: String,
    pub request_timeout_seconds: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8545".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store directory; relative paths live under `data_dir`
    pub db_path: PathBuf,
    /// Keep everything in memory (state is lost on exit)
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("db"),
            in_memory: false,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics
    pub enabled: bool,
    /// Metrics server address
    pub addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log to file
    pub log_file: Option<PathBuf>,
    /// Log format (json|pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.name, "civitas-node");
        assert!(config.rpc.enabled);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = NodeConfig::default();
        config.governance.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.chain.endpoint = " ".into();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let mut config = NodeConfig::default();
        config.governance.multisig_threshold = 2;
        config.chain.endpoint = "http://10.0.0.5:8545".into();

        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();

        let loaded = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.governance, config.governance);
        assert_eq!(loaded.chain.endpoint, "http://10.0.0.5:8545");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "name = \"dao-east\"\n\n[governance]\nbatch_size = 20\n\n[metrics]\nenabled = true"
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.name, "dao-east");
        assert_eq!(config.governance.batch_size, 20);
        assert_eq!(config.governance.min_delay_seconds, 172_800);
        assert!(config.metrics.enabled);
        assert_eq!(config.rpc.max_connections, 256);
        assert!(!config.rpc.operator_methods);
    }

    #[test]
    fn test_rpc_section_reaches_server_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[rpc]\noperator_methods = true\nrequests_per_minute = 30\nmax_body_size = 64"
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        let server = config.rpc.server_config();
        assert!(server.operator_methods);
        assert_eq!(server.requests_per_minute, 30);
        assert_eq!(server.requests_per_hour, 10_000);
        assert_eq!(server.max_body_size, 64 * 1024);

        let mut zero = NodeConfig::default();
        zero.rpc.requests_per_minute = 0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_traversal_path_rejected() {
        assert!(NodeConfig::from_file(Path::new("../etc/civitas.toml")).is_err());
    }

    #[test]
    fn test_relative_db_path_joins_data_dir() {
        let mut config = NodeConfig::default();
        config.data_dir = PathBuf::from("/var/lib/civitas");
        assert_eq!(config.db_path(), PathBuf::from("/var/lib/civitas/db"));
    }
}
