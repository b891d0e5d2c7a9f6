//! Node configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path
    pub data_dir: String,

    /// Peer link configuration
    pub peer: PeerConfig,

    /// Remote sync configuration
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// TCP port for the peer server
    pub port: u16,
    /// Outbound send timeout in seconds
    pub send_timeout_secs: u64,
    /// Shared passphrase for envelope encryption; plaintext exchange if unset
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between drain passes
    pub interval_secs: u64,
    /// User identifier reported to the remote service
    pub user_id: String,
    /// Remote incident service URL; sync idles if unset
    pub remote_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "~/.relato".to_string(),
            peer: PeerConfig {
                port: relato_core::DEFAULT_PORT,
                send_timeout_secs: 15,
                passphrase: None,
            },
            sync: SyncConfig {
                interval_secs: 300,
                user_id: "anonymous".to_string(),
                remote_url: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Expand ~ in data_dir path
    pub fn data_dir(&self) -> std::path::PathBuf {
        if self.data_dir.starts_with("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(&self.data_dir[2..]);
            }
        }
        std::path::PathBuf::from(&self.data_dir)
    }
}
