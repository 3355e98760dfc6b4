//! Server configuration
//!
//! Loaded from a TOML file. Every field has a default, so an empty file (or
//! no file at all) gives a standalone server on `127.0.0.1:6399`.

use crate::aof::AofConfig;
use crate::client::PeerClientConfig;
use crate::cluster::{ClusterConfig, PoolConfig};
use crate::database::DEFAULT_DATABASES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub aof: AofConfig,
    pub cluster: ClusterSettings,
    pub web: WebSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
    pub databases: usize,
    pub max_clients: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind: "127.0.0.1".to_string(),
            port: 6399,
            databases: DEFAULT_DATABASES,
            max_clients: 1024,
        }
    }
}

/// `[cluster]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub enabled: bool,
    /// Address peers use to reach this node, also its id on the ring
    pub self_addr: String,
    pub peers: Vec<String>,
    pub request_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub max_reconnect_attempts: usize,
    pub pool_max_total: usize,
    pub pool_max_idle: usize,
    pub pool_borrow_timeout_ms: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            enabled: false,
            self_addr: String::new(),
            peers: Vec::new(),
            request_timeout_ms: 3000,
            heartbeat_interval_secs: 10,
            max_reconnect_attempts: 3,
            pool_max_total: 8,
            pool_max_idle: 4,
            pool_borrow_timeout_ms: 3000,
        }
    }
}

impl ClusterSettings {
    /// Cluster mode needs the flag, an own address and at least one peer
    pub fn is_active(&self) -> bool {
        self.enabled && !self.self_addr.is_empty() && !self.peers.is_empty()
    }

    pub fn to_cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            self_addr: self.self_addr.clone(),
            peers: self.peers.clone(),
            pool: PoolConfig {
                max_total: self.pool_max_total,
                max_idle: self.pool_max_idle,
                borrow_timeout: Duration::from_millis(self.pool_borrow_timeout_ms),
            },
            client: PeerClientConfig {
                request_timeout: Duration::from_millis(self.request_timeout_ms),
                heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
                max_reconnect_attempts: self.max_reconnect_attempts,
                ..PeerClientConfig::default()
            },
        }
    }
}

/// `[web]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub enabled: bool,
    pub addr: String,
}

impl Default for WebSettings {
    fn default() -> Self {
        WebSettings {
            enabled: false,
            addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// Read and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.databases == 0 {
            return Err(ConfigError::Invalid("server.databases must be at least 1".into()));
        }
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid("server.max_clients must be at least 1".into()));
        }
        if self.cluster.is_active() {
            let cluster = &self.cluster;
            if cluster.heartbeat_interval_secs == 0 || cluster.request_timeout_ms == 0 {
                return Err(ConfigError::Invalid(
                    "cluster timeouts and heartbeat interval must be positive".into(),
                ));
            }
            if cluster.pool_max_total == 0 {
                return Err(ConfigError::Invalid("cluster.pool_max_total must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// `bind:port` of the RESP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aof::SyncPolicy;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6399");
        assert_eq!(config.server.databases, 16);
        assert!(!config.aof.enabled);
        assert_eq!(config.aof.path, PathBuf::from("appendonly.aof"));
        assert_eq!(config.aof.sync_policy, SyncPolicy::EverySecond);
        assert!(!config.cluster.is_active());
        assert!(!config.web.enabled);
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            [server]
            bind = "0.0.0.0"
            port = 7000

            [aof]
            enabled = true
            filename = "data/node.aof"
            fsync = "always"

            [cluster]
            enabled = true
            self_addr = "10.0.0.1:7000"
            peers = ["10.0.0.2:7000", "10.0.0.3:7000"]
            request_timeout_ms = 500

            [web]
            enabled = true
            addr = "0.0.0.0:8081"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "0.0.0.0:7000");
        assert_eq!(config.aof.sync_policy, SyncPolicy::Always);
        assert_eq!(config.aof.path, PathBuf::from("data/node.aof"));
        assert!(config.cluster.is_active());

        let cluster = config.cluster.to_cluster_config();
        assert_eq!(cluster.peers.len(), 2);
        assert_eq!(cluster.client.request_timeout, Duration::from_millis(500));
        assert_eq!(cluster.client.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(cluster.pool.max_total, 8);
    }

    #[test]
    fn test_cluster_needs_peers() {
        let config = Config::from_toml(
            r#"
            [cluster]
            enabled = true
            self_addr = "10.0.0.1:7000"
            "#,
        )
        .unwrap();
        assert!(!config.cluster.is_active());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_toml("[server]\ndatabases = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[aof]\nfsync = \"sometimes\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 6500").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 6500);

        let missing = Config::load(Path::new("/nonexistent/ferrumring.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
