//! Room-based signaling relay
//!
//! Pairs two WebSocket clients in a named room and forwards their handshake
//! envelopes (offer / answer / ice-candidate) and gesture events to each
//! other without interpreting the payloads.

mod envelope;
pub mod registry;
mod server;

pub use envelope::{Envelope, EnvelopeError, RoomId};
pub use registry::{Endpoint, EndpointId, RoomError, RoomRegistry, ROOM_CAPACITY};
pub use server::{ws_handler, Dispatch, SignalingRelay};
