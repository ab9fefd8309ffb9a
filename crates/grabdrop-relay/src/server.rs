//! WebSocket signaling relay - accepts connections and routes envelopes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::envelope::{Envelope, RoomId};
use crate::registry::{Endpoint, RoomError, RoomRegistry};

/// What the relay did with one inbound text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Created(RoomId),
    Joined(RoomId),
    Rejected(RoomError),
    /// Relayed to this many other endpoints
    Relayed(usize),
    Dropped,
}

/// Shared relay state. Every registry mutation goes through the mutex.
#[derive(Clone, Default)]
pub struct SignalingRelay {
    registry: Arc<Mutex<RoomRegistry>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> Arc<Mutex<RoomRegistry>> {
        self.registry.clone()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.lock().await.room_count()
    }

    /// Decode one text frame from `endpoint` and route it
    pub async fn dispatch(&self, endpoint: &Endpoint, text: &str) -> Dispatch {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping envelope from {}: {}", endpoint.id(), e);
                return Dispatch::Dropped;
            }
        };

        let mut registry = self.registry.lock().await;
        match envelope {
            Envelope::CreateRoom { room_id } => {
                match registry.create_or_join_as_creator(&room_id, endpoint) {
                    Ok(()) => Dispatch::Created(room_id),
                    Err(e) => Dispatch::Rejected(e),
                }
            }
            Envelope::JoinRoom { room_id } => match registry.join(&room_id, endpoint) {
                Ok(()) => Dispatch::Joined(room_id),
                Err(e) => Dispatch::Rejected(e),
            },
            Envelope::Offer { ref room_id, .. }
            | Envelope::Answer { ref room_id, .. }
            | Envelope::IceCandidate { ref room_id, .. }
            | Envelope::Gesture { ref room_id, .. } => {
                let delivered = registry.relay(room_id, endpoint.id(), text);
                debug!(
                    "Relayed {} in {} from {} to {} peer(s)",
                    envelope.kind(),
                    room_id,
                    endpoint.id(),
                    delivered
                );
                Dispatch::Relayed(delivered)
            }
            Envelope::RoomCreated { .. }
            | Envelope::PeerJoined { .. }
            | Envelope::PeerLeft { .. }
            | Envelope::Error { .. }
            | Envelope::Unknown => {
                warn!(
                    "Dropping unroutable '{}' envelope from {}",
                    envelope.kind(),
                    endpoint.id()
                );
                Dispatch::Dropped
            }
        }
    }

    /// Release every room membership held by `endpoint`
    pub async fn disconnect(&self, endpoint: &Endpoint) -> Vec<RoomId> {
        self.registry.lock().await.leave(endpoint.id())
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(relay): State<SignalingRelay>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, relay: SignalingRelay) {
    let (mut sender, mut receiver) = socket.split();
    let (endpoint, mut rx) = Endpoint::channel();

    // Writer task; once it exits the endpoint stops being writable
    let send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    info!("Client connected: {}", endpoint.id());

    while let Some(result) = receiver.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => {
                warn!(
                    "Dropping {} byte binary frame from {}",
                    data.len(),
                    endpoint.id()
                );
                continue;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error on {}: {}", endpoint.id(), e);
                break;
            }
        };

        trace!("Received from {}: {}", endpoint.id(), text);
        relay.dispatch(&endpoint, &text).await;
    }

    let rooms = relay.disconnect(&endpoint).await;
    info!("Client disconnected: {} (left {} room(s))", endpoint.id(), rooms.len());
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_type() {
        let relay = SignalingRelay::new();
        let (a, mut a_rx) = Endpoint::channel();
        let (b, mut b_rx) = Endpoint::channel();

        assert_eq!(
            relay.dispatch(&a, r#"{"type":"create-room","roomId":"R1"}"#).await,
            Dispatch::Created(room("R1"))
        );
        assert_eq!(
            relay.dispatch(&b, r#"{"type":"join-room","roomId":"R1"}"#).await,
            Dispatch::Joined(room("R1"))
        );
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        let answer = r#"{"type":"answer","roomId":"R1","payload":{"type":"answer","sdp":"x"}}"#;
        assert_eq!(relay.dispatch(&b, answer).await, Dispatch::Relayed(1));
        assert_eq!(a_rx.try_recv().unwrap(), answer);
    }

    #[tokio::test]
    async fn test_dispatch_drops_without_reply() {
        let relay = SignalingRelay::new();
        let (a, mut a_rx) = Endpoint::channel();

        for text in [
            "not valid json",
            r#"{"type":"offer","payload":{}}"#,
            r#"{"type":"join-room","roomId":""}"#,
            r#"{"type":"leave-room","roomId":"R1"}"#,
            r#"{"type":"peer-joined","roomId":"R1"}"#,
            r#"{"roomId":"R1"}"#,
        ] {
            assert_eq!(relay.dispatch(&a, text).await, Dispatch::Dropped, "{}", text);
        }

        assert!(a_rx.try_recv().is_err());
        assert_eq!(relay.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_rejected_join_is_reported() {
        let relay = SignalingRelay::new();
        let (a, mut a_rx) = Endpoint::channel();

        assert_eq!(
            relay.dispatch(&a, r#"{"type":"join-room","roomId":"R9"}"#).await,
            Dispatch::Rejected(RoomError::NotFound(room("R9")))
        );
        assert_eq!(
            Envelope::parse(&a_rx.try_recv().unwrap()).unwrap(),
            Envelope::error("Room does not exist")
        );
    }

    #[tokio::test]
    async fn test_disconnect_releases_membership() {
        let relay = SignalingRelay::new();
        let (a, _a_rx) = Endpoint::channel();

        relay.dispatch(&a, r#"{"type":"create-room","roomId":"R1"}"#).await;
        assert_eq!(relay.room_count().await, 1);

        assert_eq!(relay.disconnect(&a).await, vec![room("R1")]);
        assert_eq!(relay.room_count().await, 0);
    }
}
