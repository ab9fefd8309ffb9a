//! WebRTC peer connection carrying the file transfer data channel

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::gesture::Role;

use super::channel::DataChannel;
use super::types::{description_json, sdp_from_json, PeerEvent, WebRTCConfig, DATA_CHANNEL_LABEL};

/// One side of a two-party peer connection.
///
/// Local ICE candidates are emitted on the `candidates` sender passed to
/// [`Peer::new`] in their JSON init form, ready to be relayed.
pub struct Peer {
    role: Role,
    config: WebRTCConfig,
    pc: Arc<RTCPeerConnection>,
    events: mpsc::UnboundedSender<PeerEvent>,
    // remote candidates that arrived before the remote description
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
}

impl Peer {
    /// Create a peer connection. Data channel events are delivered on the
    /// returned receiver.
    pub async fn new(
        role: Role,
        config: WebRTCConfig,
        candidates: mpsc::UnboundedSender<Value>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let mut m = MediaEngine::default();
        m.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut m)?;

        let api = APIBuilder::new()
            .with_media_engine(m)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );
        let (events, events_rx) = mpsc::unbounded_channel();

        let peer = Self {
            role,
            config,
            pc,
            events,
            pending_candidates: Mutex::new(Vec::new()),
        };
        peer.setup_handlers(candidates);

        Ok((peer, events_rx))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.pc.connection_state() == RTCPeerConnectionState::Connected
    }

    fn setup_handlers(&self, candidates: mpsc::UnboundedSender<Value>) {
        let role = self.role;

        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let candidates = candidates.clone();
                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("ICE gathering complete");
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            let _ = candidates.send(serde_json::to_value(&init).unwrap_or_default());
                        }
                        Err(e) => warn!("Failed to encode ICE candidate: {}", e),
                    }
                })
            }));

        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    info!("Peer connection state ({}): {:?}", role, state);
                })
            }));

        if self.role == Role::Receiver {
            let config = self.config.clone();
            let events = self.events.clone();
            self.pc
                .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let config = config.clone();
                    let events = events.clone();
                    Box::pin(async move {
                        if dc.label() != DATA_CHANNEL_LABEL {
                            warn!("Ignoring unexpected data channel '{}'", dc.label());
                            return;
                        }
                        info!("Received data channel: {}", dc.label());
                        DataChannel::attach(dc, &config, events).await;
                    })
                }));
        }
    }

    /// Open the transfer data channel and create an offer (sender role)
    pub async fn create_offer(&self) -> Result<Value> {
        if self.role != Role::Sender {
            return Err(anyhow!("Only the sender creates the offer"));
        }

        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(DATA_CHANNEL_LABEL, Some(init))
            .await?;
        DataChannel::attach(dc, &self.config, self.events.clone()).await;

        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;

        Ok(description_json(&offer.sdp_type.to_string().to_lowercase(), &offer.sdp))
    }

    /// Apply a remote offer and produce the answer (receiver role)
    pub async fn handle_offer(&self, offer: &Value) -> Result<Value> {
        let sdp = sdp_from_json(offer, "offer")?;
        self.pc
            .set_remote_description(RTCSessionDescription::offer(sdp)?)
            .await?;
        self.flush_candidates().await;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;

        Ok(description_json(&answer.sdp_type.to_string().to_lowercase(), &answer.sdp))
    }

    pub async fn handle_answer(&self, answer: &Value) -> Result<()> {
        let sdp = sdp_from_json(answer, "answer")?;
        self.pc
            .set_remote_description(RTCSessionDescription::answer(sdp)?)
            .await?;
        self.flush_candidates().await;
        Ok(())
    }

    /// Apply a remote ICE candidate, holding it until the remote
    /// description is known
    pub async fn handle_candidate(&self, candidate: &Value) -> Result<()> {
        let Some(init) = candidate_from_json(candidate) else {
            return Ok(());
        };

        if self.pc.remote_description().await.is_none() {
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn flush_candidates(&self) {
        let pending: Vec<_> = self.pending_candidates.lock().await.drain(..).collect();
        for init in pending {
            if let Err(e) = self.pc.add_ice_candidate(init).await {
                warn!("Failed to add ICE candidate: {}", e);
            }
        }
    }

    pub async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Parse a browser `RTCIceCandidateInit`; `None` for end-of-candidates
fn candidate_from_json(candidate: &Value) -> Option<RTCIceCandidateInit> {
    let candidate_str = candidate
        .get("candidate")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())?;

    Some(RTCIceCandidateInit {
        candidate: candidate_str.to_string(),
        sdp_mid: candidate
            .get("sdpMid")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        sdp_mline_index: candidate
            .get("sdpMLineIndex")
            .and_then(|i| i.as_u64())
            .map(|i| i as u16),
        username_fragment: candidate
            .get("usernameFragment")
            .and_then(|u| u.as_str())
            .map(|s| s.to_string()),
    })
}
