use serde::{Deserialize, Serialize};

/// Describes the file that follows on the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub name: String,
    pub size: u64,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

/// Text frames on the peer channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlMessage {
    FileMetadata(TransferMetadata),
    FileComplete,
}

impl ControlMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
