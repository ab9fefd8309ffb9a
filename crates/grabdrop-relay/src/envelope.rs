//! Control envelopes exchanged between clients and the relay
//!
//! Wire shape: `{"type": "<kind>", "roomId": "<room>", ...}`. The relay only
//! interprets `type` and `roomId`; `payload` and `value` stay opaque.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("roomId must not be empty")]
    EmptyRoomId,
}

/// Externally supplied room identifier (case-sensitive, never empty)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Result<Self, EnvelopeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(EnvelopeError::EmptyRoomId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl std::str::FromStr for RoomId {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// All envelope kinds known to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Envelope {
    CreateRoom { room_id: RoomId },
    JoinRoom { room_id: RoomId },
    RoomCreated { room_id: RoomId },
    PeerJoined { room_id: RoomId },
    PeerLeft { room_id: RoomId },
    Error { message: String },
    Offer { room_id: RoomId, payload: Value },
    Answer { room_id: RoomId, payload: Value },
    IceCandidate { room_id: RoomId, payload: Value },
    Gesture { room_id: RoomId, value: String },
    /// Any `type` the relay does not know. Never routed.
    #[serde(other)]
    Unknown,
}

impl Envelope {
    /// Decode one inbound text frame
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::CreateRoom { .. } => "create-room",
            Envelope::JoinRoom { .. } => "join-room",
            Envelope::RoomCreated { .. } => "room-created",
            Envelope::PeerJoined { .. } => "peer-joined",
            Envelope::PeerLeft { .. } => "peer-left",
            Envelope::Error { .. } => "error",
            Envelope::Offer { .. } => "offer",
            Envelope::Answer { .. } => "answer",
            Envelope::IceCandidate { .. } => "ice-candidate",
            Envelope::Gesture { .. } => "gesture",
            Envelope::Unknown => "unknown",
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Envelope::CreateRoom { room_id }
            | Envelope::JoinRoom { room_id }
            | Envelope::RoomCreated { room_id }
            | Envelope::PeerJoined { room_id }
            | Envelope::PeerLeft { room_id }
            | Envelope::Offer { room_id, .. }
            | Envelope::Answer { room_id, .. }
            | Envelope::IceCandidate { room_id, .. }
            | Envelope::Gesture { room_id, .. } => Some(room_id),
            Envelope::Error { .. } | Envelope::Unknown => None,
        }
    }

    /// Kinds forwarded blindly to the other room member
    pub fn is_relayed(&self) -> bool {
        matches!(
            self,
            Envelope::Offer { .. }
                | Envelope::Answer { .. }
                | Envelope::IceCandidate { .. }
                | Envelope::Gesture { .. }
        )
    }

    pub fn create_room(room_id: RoomId) -> Self {
        Envelope::CreateRoom { room_id }
    }

    pub fn join_room(room_id: RoomId) -> Self {
        Envelope::JoinRoom { room_id }
    }

    pub fn room_created(room_id: RoomId) -> Self {
        Envelope::RoomCreated { room_id }
    }

    pub fn peer_joined(room_id: RoomId) -> Self {
        Envelope::PeerJoined { room_id }
    }

    pub fn peer_left(room_id: RoomId) -> Self {
        Envelope::PeerLeft { room_id }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
        }
    }

    pub fn offer(room_id: RoomId, payload: Value) -> Self {
        Envelope::Offer { room_id, payload }
    }

    pub fn answer(room_id: RoomId, payload: Value) -> Self {
        Envelope::Answer { room_id, payload }
    }

    pub fn ice_candidate(room_id: RoomId, payload: Value) -> Self {
        Envelope::IceCandidate { room_id, payload }
    }

    pub fn gesture(room_id: RoomId, value: impl Into<String>) -> Self {
        Envelope::Gesture {
            room_id,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room(id: &str) -> RoomId {
        RoomId::new(id).unwrap()
    }

    #[test]
    fn test_parse_browser_create_room() {
        let parsed = Envelope::parse(r#"{"type":"create-room","roomId":"demo-room"}"#).unwrap();
        assert_eq!(parsed, Envelope::create_room(room("demo-room")));
        assert_eq!(parsed.kind(), "create-room");
        assert_eq!(parsed.room_id().map(RoomId::as_str), Some("demo-room"));
    }

    #[test]
    fn test_relay_kinds_wire_names() {
        let candidate = Envelope::ice_candidate(room("R1"), json!({"candidate": "c", "sdpMid": "0"}));
        let json = candidate.to_json().unwrap();
        assert!(json.contains(r#""type":"ice-candidate""#));
        assert!(json.contains(r#""roomId":"R1""#));
        assert!(candidate.is_relayed());

        let gesture = Envelope::parse(r#"{"type":"gesture","roomId":"R1","value":"GRAB","confidence":0.9}"#).unwrap();
        assert_eq!(gesture, Envelope::gesture(room("R1"), "GRAB"));
        assert!(gesture.is_relayed());
    }

    #[test]
    fn test_error_has_no_room() {
        let json = Envelope::error("Room does not exist").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Room does not exist"}"#);
        assert!(Envelope::parse(&json).unwrap().room_id().is_none());
    }

    #[test]
    fn test_unknown_type_is_unroutable() {
        let parsed = Envelope::parse(r#"{"type":"leave-room","roomId":"R1"}"#).unwrap();
        assert_eq!(parsed, Envelope::Unknown);
        assert!(parsed.room_id().is_none());
        assert!(!parsed.is_relayed());
    }

    #[test]
    fn test_missing_or_empty_room_is_malformed() {
        assert!(matches!(
            Envelope::parse(r#"{"type":"join-room"}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"offer","roomId":"","payload":{}}"#),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(RoomId::new(""), Err(EnvelopeError::EmptyRoomId)));
    }

    #[test]
    fn test_missing_type_or_garbage_is_malformed() {
        assert!(Envelope::parse(r#"{"roomId":"R1"}"#).is_err());
        assert!(Envelope::parse("not valid json").is_err());
        assert!(Envelope::parse("[1,2,3]").is_err());
    }

    #[test]
    fn test_room_id_is_case_sensitive() {
        assert_ne!(room("Room"), room("room"));
    }
}
