use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::webrtc::WebRTCConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signaling relay to connect to
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_room_id")]
    pub room_id: String,
    /// STUN servers for NAT traversal
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Chunk sends pause while more than this many bytes are queued
    #[serde(default = "default_max_buffered_amount")]
    pub max_buffered_amount: usize,
    /// Paused sends resume once the queue drains below this
    #[serde(default = "default_buffered_amount_low_threshold")]
    pub buffered_amount_low_threshold: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:3000".to_string()
}

fn default_room_id() -> String {
    "demo-room".to_string()
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.l.google.com:19302".to_string()]
}

fn default_max_buffered_amount() -> usize {
    1024 * 1024
}

fn default_buffered_amount_low_threshold() -> usize {
    256 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            room_id: default_room_id(),
            stun_servers: default_stun_servers(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_buffered_amount: default_max_buffered_amount(),
            buffered_amount_low_threshold: default_buffered_amount_low_threshold(),
        }
    }
}

impl Config {
    /// Load config from file, or create default if doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = get_config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    /// Load config from an explicit path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    /// Peer connection settings for the client roles
    pub fn webrtc(&self) -> WebRTCConfig {
        WebRTCConfig {
            stun_servers: self.client.stun_servers.clone(),
            max_buffered_amount: self.transfer.max_buffered_amount,
            buffered_amount_low_threshold: self.transfer.buffered_amount_low_threshold,
        }
    }
}

/// Get the grabdrop directory (~/.grabdrop)
pub fn get_grabdrop_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grabdrop")
}

/// Get the config file path (~/.grabdrop/config.toml)
pub fn get_config_path() -> PathBuf {
    get_grabdrop_dir().join("config.toml")
}
