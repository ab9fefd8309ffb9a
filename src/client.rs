//! Signaling client
//!
//! Joins a room on the relay, negotiates the WebRTC peer channel through it
//! and runs one side of the transfer:
//! - sender: creates the room, offers on `peer-joined`, sends the selected
//!   file when a DROP gesture passes the trigger
//! - receiver: joins the room, answers the offer, saves completed files

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use grabdrop_relay::{Envelope, RoomId};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

use crate::gesture::{Gesture, GestureTrigger, Role, TriggerDecision};
use crate::transfer::{
    CompletedFile, PeerChannel, Reassembler, Received, SelectedFile, TransferError,
    TransferSession,
};
use crate::webrtc::{DataChannel, Peer, PeerEvent, WebRTCConfig};

/// Where to connect and how to set up the peer connection
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub relay_url: String,
    pub room_id: RoomId,
    pub webrtc: WebRTCConfig,
}

/// Create the room and push `file` on GRAB followed by DROP. Runs until the
/// relay connection closes.
pub async fn run_sender(options: ClientOptions, file: SelectedFile) -> Result<()> {
    let mut session = Session::new(Role::Sender, &options, None);
    session.trigger.select_file(file);
    session.run(&options.relay_url).await
}

/// Join the room and write every received file into `out_dir`. Runs until
/// the relay connection closes.
pub async fn run_receiver(options: ClientOptions, out_dir: PathBuf) -> Result<()> {
    let session = Session::new(Role::Receiver, &options, Some(out_dir));
    session.run(&options.relay_url).await
}

/// Publish one gesture into `room_id` without joining it
pub async fn publish_gesture(relay_url: &str, room_id: RoomId, gesture: Gesture) -> Result<()> {
    let (mut ws, _) = connect_async(relay_url)
        .await
        .with_context(|| format!("Failed to connect to relay {}", relay_url))?;

    let text = Envelope::gesture(room_id.clone(), gesture.as_str()).to_json()?;
    ws.send(Message::Text(text))
        .await
        .context("Failed to send gesture")?;
    info!("Published {} to {}", gesture, room_id);

    let _ = ws.close(None).await;
    Ok(())
}

type TransferResult = Result<u64, TransferError>;

struct Session {
    role: Role,
    room_id: RoomId,
    webrtc: WebRTCConfig,
    out_dir: Option<PathBuf>,
    joined: bool,

    outbound: mpsc::UnboundedSender<Envelope>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Envelope>>,
    transfer_done: mpsc::UnboundedSender<TransferResult>,
    transfer_done_rx: Option<mpsc::UnboundedReceiver<TransferResult>>,

    peer: Option<Peer>,
    peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    peer_candidates: Option<mpsc::UnboundedReceiver<Value>>,
    channel: Option<Arc<DataChannel>>,

    trigger: GestureTrigger,
    reassembler: Reassembler,
}

impl Session {
    fn new(role: Role, options: &ClientOptions, out_dir: Option<PathBuf>) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (transfer_done, transfer_done_rx) = mpsc::unbounded_channel();

        Self {
            role,
            room_id: options.room_id.clone(),
            webrtc: options.webrtc.clone(),
            out_dir,
            joined: false,
            outbound,
            outbound_rx: Some(outbound_rx),
            transfer_done,
            transfer_done_rx: Some(transfer_done_rx),
            peer: None,
            peer_events: None,
            peer_candidates: None,
            channel: None,
            trigger: GestureTrigger::new(role),
            reassembler: Reassembler::new(),
        }
    }

    async fn run(mut self, relay_url: &str) -> Result<()> {
        let (ws, _) = connect_async(relay_url)
            .await
            .with_context(|| format!("Failed to connect to relay {}", relay_url))?;
        info!("Connected to relay {} as {}", relay_url, self.role);

        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| anyhow!("Session already running"))?;
        let mut transfer_done_rx = self
            .transfer_done_rx
            .take()
            .ok_or_else(|| anyhow!("Session already running"))?;

        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} envelope: {}", envelope.kind(), e);
                        continue;
                    }
                };
                trace!("Sending to relay: {}", text);
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let hello = match self.role {
            Role::Sender => Envelope::create_room(self.room_id.clone()),
            Role::Receiver => Envelope::join_room(self.room_id.clone()),
        };
        self.send(hello);

        let result = loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.on_signal(&text).await {
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Relay connection closed");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(anyhow!("Relay connection lost: {}", e)),
                },
                Some(candidate) = next_on(&mut self.peer_candidates) => {
                    self.send(Envelope::ice_candidate(self.room_id.clone(), candidate));
                }
                Some(event) = next_on(&mut self.peer_events) => {
                    self.on_peer_event(event).await;
                }
                Some(result) = transfer_done_rx.recv() => {
                    self.on_transfer_done(result);
                }
            }
        };

        self.drop_peer().await;
        writer.abort();
        result
    }

    fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            warn!("Relay writer has stopped");
        }
    }

    async fn on_signal(&mut self, text: &str) -> Result<()> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring relay message: {}", e);
                return Ok(());
            }
        };
        debug!("Relay: {}", envelope.kind());

        match envelope {
            Envelope::RoomCreated { room_id } => {
                info!("Room {} ready, waiting for a peer", room_id);
                self.joined = true;
            }
            Envelope::PeerJoined { room_id } => {
                info!("Peer present in {}", room_id);
                self.joined = true;
                if self.role == Role::Sender {
                    if let Err(e) = self.start_offer().await {
                        error!("Failed to create offer: {:#}", e);
                    }
                }
            }
            Envelope::PeerLeft { room_id } => {
                info!("Peer left {}", room_id);
                self.drop_peer().await;
            }
            Envelope::Error { message } => {
                if !self.joined {
                    return Err(anyhow!("Relay refused room {}: {}", self.room_id, message));
                }
                error!("Relay error: {}", message);
            }
            Envelope::Offer { payload, .. } => {
                if self.role == Role::Receiver {
                    if let Err(e) = self.accept_offer(&payload).await {
                        error!("Failed to answer offer: {:#}", e);
                    }
                } else {
                    debug!("Ignoring offer as sender");
                }
            }
            Envelope::Answer { payload, .. } => match (&self.peer, self.role) {
                (Some(peer), Role::Sender) => {
                    if let Err(e) = peer.handle_answer(&payload).await {
                        error!("Failed to apply answer: {:#}", e);
                    }
                }
                _ => debug!("Ignoring unexpected answer"),
            },
            Envelope::IceCandidate { payload, .. } => {
                if let Some(ref peer) = self.peer {
                    if let Err(e) = peer.handle_candidate(&payload).await {
                        warn!("Failed to add ICE candidate: {:#}", e);
                    }
                }
            }
            Envelope::Gesture { value, .. } => self.on_gesture(&value),
            other => debug!("Ignoring {} envelope", other.kind()),
        }
        Ok(())
    }

    async fn start_offer(&mut self) -> Result<()> {
        self.drop_peer().await;

        let (candidates, candidates_rx) = mpsc::unbounded_channel();
        let (peer, events) = Peer::new(Role::Sender, self.webrtc.clone(), candidates).await?;
        let offer = peer.create_offer().await?;
        self.send(Envelope::offer(self.room_id.clone(), offer));
        info!("Sent offer");

        self.peer = Some(peer);
        self.peer_events = Some(events);
        self.peer_candidates = Some(candidates_rx);
        Ok(())
    }

    async fn accept_offer(&mut self, offer: &Value) -> Result<()> {
        self.drop_peer().await;

        let (candidates, candidates_rx) = mpsc::unbounded_channel();
        let (peer, events) = Peer::new(Role::Receiver, self.webrtc.clone(), candidates).await?;
        self.peer = Some(peer);
        self.peer_events = Some(events);
        self.peer_candidates = Some(candidates_rx);

        if let Some(ref peer) = self.peer {
            let answer = peer.handle_offer(offer).await?;
            self.send(Envelope::answer(self.room_id.clone(), answer));
            info!("Sent answer");
        }
        Ok(())
    }

    fn channel_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    fn on_gesture(&mut self, value: &str) {
        let gesture: Gesture = match value.parse() {
            Ok(gesture) => gesture,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        let channel_open = self.channel_open();
        match self.trigger.on_gesture(gesture, channel_open) {
            TriggerDecision::Send(file) => self.start_transfer(file),
            TriggerDecision::Held => info!("File grabbed, waiting for drop"),
            decision => debug!("Gesture {}: {:?}", gesture, decision),
        }
    }

    fn start_transfer(&mut self, file: SelectedFile) {
        let Some(ref channel) = self.channel else {
            warn!("Peer channel not ready");
            self.trigger.transfer_finished();
            return;
        };

        let channel: Arc<dyn PeerChannel> = channel.clone();
        let session = TransferSession::new(channel);
        let done = self.transfer_done.clone();

        tokio::spawn(async move {
            let name = file.metadata().name.clone();
            let mut reported = 0;
            let result = session
                .send(&file, |progress| {
                    let tenth = (progress.fraction() * 10.0) as u32;
                    if tenth > reported {
                        reported = tenth;
                        info!("Sending {}: {}", name, progress);
                    }
                })
                .await;
            let _ = done.send(result);
        });
    }

    fn on_transfer_done(&mut self, result: TransferResult) {
        self.trigger.transfer_finished();
        match result {
            Ok(sent) => info!("Transfer finished ({} bytes)", sent),
            Err(e) => error!("Transfer failed: {}", e),
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Open(channel) => {
                info!("Peer channel ready");
                self.channel = Some(channel);
            }
            PeerEvent::Frame(frame) => match self.reassembler.on_frame(frame) {
                Received::Completed(file) => self.deliver(file).await,
                Received::Progress(progress) => trace!("Receiving: {}", progress),
                Received::Started(_) | Received::Ignored => {}
            },
            PeerEvent::Closed => {
                info!("Peer channel closed");
                self.channel = None;
                self.reassembler.abort();
            }
        }
    }

    async fn deliver(&self, file: CompletedFile) {
        let Some(ref dir) = self.out_dir else {
            warn!("Dropping received file {}: no output directory", file.name);
            return;
        };
        match file.save_into(dir).await {
            Ok(path) => info!(
                "Saved {} ({} bytes, {})",
                path.display(),
                file.data.len(),
                file.mime_type
            ),
            Err(e) => error!("Failed to save {}: {}", file.name, e),
        }
    }

    async fn drop_peer(&mut self) {
        self.channel = None;
        self.peer_events = None;
        self.peer_candidates = None;
        self.reassembler.abort();
        if let Some(peer) = self.peer.take() {
            if let Err(e) = peer.close().await {
                debug!("Error closing peer connection: {}", e);
            }
        }
    }
}

/// Receive from the current peer's queue; pending while there is no peer
async fn next_on<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn options() -> ClientOptions {
        ClientOptions {
            relay_url: "ws://127.0.0.1:1".to_string(),
            room_id: RoomId::new("demo-room").unwrap(),
            webrtc: WebRTCConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_dropped_peer_candidates_are_not_relayed() {
        let mut session = Session::new(Role::Sender, &options(), None);
        let mut outbound_rx = session.outbound_rx.take().unwrap();

        let (candidates, candidates_rx) = mpsc::unbounded_channel();
        session.peer_candidates = Some(candidates_rx);
        candidates.send(json!({"candidate": "stale"})).unwrap();

        session.drop_peer().await;
        assert!(session.peer_candidates.is_none());

        // the old peer can no longer queue candidates, and none are pending
        assert!(candidates.send(json!({"candidate": "late"})).is_err());
        let next = tokio::time::timeout(
            Duration::from_millis(50),
            next_on(&mut session.peer_candidates),
        )
        .await;
        assert!(next.is_err());
        assert!(outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_next_peer_gets_its_own_candidates() {
        let mut session = Session::new(Role::Receiver, &options(), None);

        let (old, old_rx) = mpsc::unbounded_channel::<Value>();
        session.peer_candidates = Some(old_rx);
        session.drop_peer().await;

        let (new, new_rx) = mpsc::unbounded_channel();
        session.peer_candidates = Some(new_rx);
        assert!(old.send(json!({"candidate": "old"})).is_err());
        new.send(json!({"candidate": "new"})).unwrap();

        let next = next_on(&mut session.peer_candidates).await;
        assert_eq!(next, Some(json!({"candidate": "new"})));
    }
}
