//! Chunked file transfer over an ordered, reliable peer channel
//!
//! Frame sequence for one file, sender to receiver:
//! - text `{"type":"file-metadata","name":..,"size":..,"mimeType":..}`
//! - zero or more binary chunks of at most [`CHUNK_SIZE`] bytes, in order
//! - text `{"type":"file-complete"}`
//!
//! Text frames are control messages, binary frames are data; there is no
//! tag on binary frames. No checksum or length check is performed: the
//! declared size only drives progress reporting.

mod channel;
mod message;
mod mime;
mod receiver;
mod sender;

pub use channel::{Frame, PeerChannel};
pub use message::{ControlMessage, TransferMetadata};
pub use mime::mime_type_for;
pub use receiver::{CompletedFile, Reassembler, Received};
pub use sender::{SelectedFile, TransferSession};

use thiserror::Error;

/// Size of every chunk except possibly the last
pub const CHUNK_SIZE: usize = 16384;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("peer channel is not open")]
    ChannelNotReady,

    #[error("peer channel lost: {0}")]
    TransportLost(String),

    #[error("not a regular file: {0}")]
    NotAFile(std::path::PathBuf),

    #[error("failed to encode control message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Advisory transfer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub transferred: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(transferred: u64, total: u64) -> Self {
        Self { transferred, total }
    }

    /// Fraction done in `[0, 1]`. An empty file counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.transferred as f64 / self.total as f64).min(1.0)
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.1}% ({}/{} bytes)",
            self.percent(),
            self.transferred,
            self.total
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress::new(0, 0).fraction(), 1.0);
        assert_eq!(Progress::new(8192, 16384).fraction(), 0.5);
        // declared size is informational; overshoot is clamped
        assert_eq!(Progress::new(20, 10).fraction(), 1.0);
        assert_eq!(Progress::new(1, 4).to_string(), "25.0% (1/4 bytes)");
    }
}
