use async_trait::async_trait;
use bytes::Bytes;

use super::TransferError;

/// One message as delivered by the peer channel. Control messages travel as
/// text, file data as binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

/// An established, ordered and reliable channel to the remote peer
#[async_trait]
pub trait PeerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> Result<(), TransferError>;

    /// Resolves once the channel has accepted `data`. Implementations with a
    /// send buffer wait here until it has drained below their threshold.
    async fn send_binary(&self, data: Bytes) -> Result<(), TransferError>;
}
