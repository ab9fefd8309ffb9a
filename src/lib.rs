pub mod client;
pub mod config;
pub mod gesture;
pub mod server;
pub mod transfer;
pub mod webrtc;

pub use client::{publish_gesture, run_receiver, run_sender, ClientOptions};
pub use config::Config;
pub use gesture::{DropPrecondition, Gesture, GestureState, GestureTrigger, Role, TriggerDecision};
pub use grabdrop_relay::{Envelope, RoomId, SignalingRelay};
pub use server::RelayServer;
pub use transfer::{
    CompletedFile, PeerChannel, Reassembler, Received, SelectedFile, TransferError,
    TransferSession, CHUNK_SIZE,
};
