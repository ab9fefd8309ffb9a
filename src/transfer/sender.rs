use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use super::message::{ControlMessage, TransferMetadata};
use super::mime::mime_type_for;
use super::{PeerChannel, Progress, TransferError, CHUNK_SIZE};

/// A file picked by the operator, ready to be pushed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    path: PathBuf,
    metadata: TransferMetadata,
}

impl SelectedFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let fs_meta = tokio::fs::metadata(path).await?;
        if !fs_meta.is_file() {
            return Err(TransferError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::NotAFile(path.to_path_buf()))?;
        let mime_type = mime_type_for(&name).to_string();

        Ok(Self {
            path: path.to_path_buf(),
            metadata: TransferMetadata {
                name,
                size: fs_meta.len(),
                mime_type,
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &TransferMetadata {
        &self.metadata
    }
}

/// Sending half of a transfer over one peer channel
#[derive(Clone)]
pub struct TransferSession {
    channel: Arc<dyn PeerChannel>,
}

impl TransferSession {
    pub fn new(channel: Arc<dyn PeerChannel>) -> Self {
        Self { channel }
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_open()
    }

    /// Push `file` to the peer. Returns the number of payload bytes sent.
    pub async fn send<F>(&self, file: &SelectedFile, on_progress: F) -> Result<u64, TransferError>
    where
        F: FnMut(Progress),
    {
        if !self.channel.is_open() {
            return Err(TransferError::ChannelNotReady);
        }
        let reader = tokio::fs::File::open(file.path()).await?;
        self.send_from(file.metadata().clone(), reader, on_progress)
            .await
    }

    /// Stream `reader` to the peer as the file described by `metadata`
    pub async fn send_from<R, F>(
        &self,
        metadata: TransferMetadata,
        mut reader: R,
        mut on_progress: F,
    ) -> Result<u64, TransferError>
    where
        R: AsyncRead + Unpin,
        F: FnMut(Progress),
    {
        if !self.channel.is_open() {
            return Err(TransferError::ChannelNotReady);
        }

        info!("Sending file: {} ({} bytes)", metadata.name, metadata.size);
        let total = metadata.size;
        self.channel
            .send_text(ControlMessage::FileMetadata(metadata).to_json()?)
            .await?;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;
        loop {
            let n = fill_chunk(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }

            self.channel
                .send_binary(Bytes::copy_from_slice(&buf[..n]))
                .await?;
            sent += n as u64;

            let progress = Progress::new(sent, total);
            debug!("Sending progress: {}", progress);
            on_progress(progress);

            if n < CHUNK_SIZE {
                break;
            }
        }

        self.channel
            .send_text(ControlMessage::FileComplete.to_json()?)
            .await?;
        info!("File sent completely ({} bytes)", sent);

        Ok(sent)
    }
}

/// Read until `buf` is full or the reader is exhausted
async fn fill_chunk<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
