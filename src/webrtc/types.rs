//! Peer channel configuration and session description helpers

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::transfer::Frame;

use super::channel::DataChannel;

/// Label of the single data channel the sender opens
pub const DATA_CHANNEL_LABEL: &str = "fileTransfer";

/// Peer connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRTCConfig {
    /// STUN servers for NAT traversal
    pub stun_servers: Vec<String>,
    /// Chunk sends wait while more than this many bytes are queued
    pub max_buffered_amount: usize,
    /// Waiting sends resume once the queue drains below this
    pub buffered_amount_low_threshold: usize,
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            max_buffered_amount: 1024 * 1024,
            buffered_amount_low_threshold: 256 * 1024,
        }
    }
}

/// Data channel lifecycle, in delivery order
#[derive(Clone)]
pub enum PeerEvent {
    Open(Arc<DataChannel>),
    Frame(Frame),
    Closed,
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::Open(dc) => write!(f, "Open({})", dc.label()),
            PeerEvent::Frame(frame) => f.debug_tuple("Frame").field(frame).finish(),
            PeerEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// `{type, sdp}` as exchanged through the relay
pub fn description_json(sdp_type: &str, sdp: &str) -> serde_json::Value {
    serde_json::json!({
        "type": sdp_type,
        "sdp": sdp,
    })
}

/// Pull the SDP text out of an offer or answer payload
pub fn sdp_from_json(payload: &serde_json::Value, expected_type: &str) -> Result<String> {
    if let Some(t) = payload.get("type").and_then(|t| t.as_str()) {
        if t != expected_type {
            return Err(anyhow!("Expected {} description, got {}", expected_type, t));
        }
    }
    payload
        .get("sdp")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Missing SDP in {}", expected_type))
}
