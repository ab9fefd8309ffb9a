//! WebRTC peer channel for file transfer
//!
//! Offers, answers and ICE candidates are exchanged as opaque payloads
//! through the signaling relay:
//! - offer/answer: `{"type": "offer" | "answer", "sdp": ...}`
//! - candidate: the browser `RTCIceCandidateInit` form
//!
//! The sender opens one ordered, reliable data channel labelled
//! `fileTransfer`; the receiver adopts it when announced.

mod channel;
mod peer;
mod types;

pub use channel::DataChannel;
pub use peer::Peer;
pub use types::{description_json, sdp_from_json, PeerEvent, WebRTCConfig, DATA_CHANNEL_LABEL};
