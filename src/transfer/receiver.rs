use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::message::{ControlMessage, TransferMetadata};
use super::{Frame, Progress};

const FALLBACK_NAME: &str = "download";

/// A fully received file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl CompletedFile {
    /// Write the file into `dir` and return its path. Only the last
    /// component of the announced name is used.
    pub async fn save_into(&self, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name());
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }

    fn file_name(&self) -> &str {
        Path::new(&self.name)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(FALLBACK_NAME)
    }
}

/// Outcome of feeding one frame to the [`Reassembler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Started(TransferMetadata),
    Progress(Progress),
    Completed(CompletedFile),
    Ignored,
}

/// Receiving half of a transfer. Frames must be fed in delivery order.
///
/// A new `file-metadata` discards whatever was buffered for an unfinished
/// previous file. That data is lost; nothing reports it beyond a log line.
#[derive(Debug, Default)]
pub struct Reassembler {
    active: Option<TransferMetadata>,
    chunks: Vec<Bytes>,
    buffered: u64,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&TransferMetadata> {
        self.active.as_ref()
    }

    /// Bytes buffered for the active file
    pub fn buffered_len(&self) -> u64 {
        self.buffered
    }

    pub fn on_frame(&mut self, frame: Frame) -> Received {
        match frame {
            Frame::Text(text) => self.on_control(&text),
            Frame::Binary(data) => self.on_chunk(data),
        }
    }

    /// Drop the active transfer, e.g. because the channel closed
    pub fn abort(&mut self) -> Option<TransferMetadata> {
        let active = self.active.take();
        if let Some(ref meta) = active {
            warn!(
                "Transfer of {} aborted after {} of {} bytes",
                meta.name, self.buffered, meta.size
            );
        }
        self.clear();
        active
    }

    fn on_control(&mut self, text: &str) -> Received {
        match ControlMessage::parse(text) {
            Ok(ControlMessage::FileMetadata(meta)) => {
                if let Some(ref previous) = self.active {
                    warn!(
                        "Discarding {} buffered bytes of unfinished {}",
                        self.buffered, previous.name
                    );
                }
                info!("Receiving file: {} ({} bytes)", meta.name, meta.size);
                self.clear();
                self.active = Some(meta.clone());
                Received::Started(meta)
            }
            Ok(ControlMessage::FileComplete) => self.complete(),
            Err(e) => {
                debug!("Ignoring control message: {}", e);
                Received::Ignored
            }
        }
    }

    fn on_chunk(&mut self, data: Bytes) -> Received {
        let Some(ref meta) = self.active else {
            debug!("Dropping {} byte chunk with no active transfer", data.len());
            return Received::Ignored;
        };

        self.buffered += data.len() as u64;
        self.chunks.push(data);

        let progress = Progress::new(self.buffered, meta.size);
        debug!("Receiving: {}", progress);
        Received::Progress(progress)
    }

    fn complete(&mut self) -> Received {
        let Some(ref meta) = self.active else {
            debug!("file-complete with no active transfer");
            return Received::Ignored;
        };
        // An empty buffer only completes a file announced as empty
        if self.chunks.is_empty() && meta.size > 0 {
            debug!("file-complete for {} with nothing buffered", meta.name);
            return Received::Ignored;
        }

        let mut data = Vec::with_capacity(self.buffered as usize);
        for chunk in self.chunks.drain(..) {
            data.extend_from_slice(&chunk);
        }
        self.buffered = 0;

        let Some(meta) = self.active.take() else {
            return Received::Ignored;
        };
        info!("File received completely: {} ({} bytes)", meta.name, data.len());

        Received::Completed(CompletedFile {
            name: meta.name,
            mime_type: meta.mime_type,
            data,
        })
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
    }
}
