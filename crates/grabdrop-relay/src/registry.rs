//! Room membership for the signaling relay
//!
//! A room holds at most [`ROOM_CAPACITY`] endpoints and exists only while it
//! has members. The registry is plain owned state; callers serialize access
//! to it (see [`crate::SignalingRelay`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope::{Envelope, RoomId};

/// Maximum number of endpoints in one room
pub const ROOM_CAPACITY: usize = 2;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Room does not exist")]
    NotFound(RoomId),

    #[error("Room already full")]
    Full(RoomId),
}

/// Identity of one relay connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// A connected relay session: its id plus the outbound queue drained by the
/// connection's writer task
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: EndpointId,
    tx: mpsc::UnboundedSender<String>,
}

impl Endpoint {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: EndpointId(NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed)),
            tx,
        }
    }

    /// Endpoint together with the receiving half of its outbound queue
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// False once the writer task has gone away
    pub fn is_writable(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(text).is_ok()
    }

    pub fn send(&self, envelope: &Envelope) -> bool {
        match envelope.to_json() {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("Failed to encode {} envelope: {}", envelope.kind(), e);
                false
            }
        }
    }
}

#[derive(Default)]
struct Room {
    members: Vec<Endpoint>,
}

impl Room {
    fn contains(&self, id: EndpointId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    fn broadcast(&self, envelope: &Envelope) -> usize {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} envelope: {}", envelope.kind(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        for member in &self.members {
            if member.send_text(text.clone()) {
                delivered += 1;
            } else {
                debug!("Skipping {}: transport closed", member.id);
            }
        }
        delivered
    }
}

/// Room id to member set
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle `create-room`: create the room if absent and add the caller.
    ///
    /// Creating an existing room is not an error; the caller simply joins
    /// it. The caller receives `room-created` on success, or an `error`
    /// envelope if the room is already full with other endpoints.
    pub fn create_or_join_as_creator(
        &mut self,
        room_id: &RoomId,
        endpoint: &Endpoint,
    ) -> Result<(), RoomError> {
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            info!("Room created: {}", room_id);
            Room::default()
        });

        if !room.contains(endpoint.id) {
            if room.members.len() >= ROOM_CAPACITY {
                return Err(reject(endpoint, RoomError::Full(room_id.clone())));
            }
            room.members.push(endpoint.clone());
        }

        endpoint.send(&Envelope::room_created(room_id.clone()));
        Ok(())
    }

    /// Handle `join-room`. On success every member, the joiner included,
    /// receives `peer-joined`. Failures are reported to the joiner only and
    /// leave membership untouched.
    pub fn join(&mut self, room_id: &RoomId, endpoint: &Endpoint) -> Result<(), RoomError> {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return Err(reject(endpoint, RoomError::NotFound(room_id.clone())));
        };

        if room.members.len() >= ROOM_CAPACITY {
            return Err(reject(endpoint, RoomError::Full(room_id.clone())));
        }

        if !room.contains(endpoint.id) {
            room.members.push(endpoint.clone());
        }

        room.broadcast(&Envelope::peer_joined(room_id.clone()));
        info!("Peer joined room: {} ({} members)", room_id, room.members.len());
        Ok(())
    }

    /// Remove an endpoint from every room it belongs to. Remaining members
    /// get `peer-left`; rooms left empty are destroyed. Returns the rooms
    /// the endpoint was removed from.
    pub fn leave(&mut self, endpoint: EndpointId) -> Vec<RoomId> {
        let mut left = Vec::new();

        self.rooms.retain(|room_id, room| {
            if !room.contains(endpoint) {
                return true;
            }
            room.members.retain(|m| m.id != endpoint);
            left.push(room_id.clone());

            room.broadcast(&Envelope::peer_left(room_id.clone()));

            if room.members.is_empty() {
                info!("Room destroyed: {}", room_id);
                false
            } else {
                true
            }
        });

        left
    }

    /// Forward `text` unchanged to every writable member of the room except
    /// the sender. The sender does not need to be a member. Unknown rooms
    /// are a silent drop. Returns the number of deliveries.
    pub fn relay(&self, room_id: &RoomId, sender: EndpointId, text: &str) -> usize {
        let Some(room) = self.rooms.get(room_id) else {
            debug!("Relay to unknown room {} dropped", room_id);
            return 0;
        };

        room.members
            .iter()
            .filter(|m| m.id != sender && m.is_writable())
            .filter(|m| m.send_text(text.to_string()))
            .count()
    }

    pub fn contains_room(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.members.len())
    }

    pub fn is_member(&self, room_id: &RoomId, endpoint: EndpointId) -> bool {
        self.rooms.get(room_id).is_some_and(|r| r.contains(endpoint))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

fn reject(endpoint: &Endpoint, err: RoomError) -> RoomError {
    debug!("Rejecting {}: {}", endpoint.id, err);
    endpoint.send(&Envelope::error(err.to_string()));
    err
}
