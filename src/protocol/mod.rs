use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hash wrapper as the server expects it: `{ "hash": "<decimal u64>" }`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDto {
    pub hash: String,
}

/// Metadata registered before any chunk is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub file_name: String,
    pub file_type: String,
    pub total_chunks: usize,
    pub file_chunks_hashs: Vec<HashDto>,
    pub validate_hash: HashDto,
}

/// One chunk upload body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_name: String,
    pub index: usize,
    pub chunk: Vec<u8>,
    pub validate_hash: HashDto,
}

/// Upload capability issued on successful registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileToken {
    pub token: String,
}

/// Registration reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileDataResponse {
    Successful(FileToken),
    Failed(String),
}

/// Events pushed by the game server over the socket.
///
/// Only the action-state branch is decoded; the others are carried as raw
/// JSON so unknown payloads never break the sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerEvent {
    Board(Value),
    Websocket(Value),
    Session(Value),
    Error(Value),
    ActionState(ActionStateEvent),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionStateEvent {
    Media(ActionMediaEvent),
    /// Elapsed delta in ms between our request timestamp and the server clock
    SyncForward(f64),
    /// Server wall clock in ms at send time
    SyncBackward(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionMediaEvent {
    Play,
    Pause,
    Resume,
    ChangeState(MediaStatus),
}

/// Shared playback state broadcast by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaStatus {
    /// Seconds into the media
    pub video_timestamp: f64,
    /// Server clock in ms when the status was last changed
    pub last_updated: f64,
    pub playing: bool,
    pub global_timestamp: f64,
    pub interaction_id: Value,
}

/// Events sent by this client over the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientEvent {
    MediaEvent(MediaEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediaEvent {
    SyncBackwardRequest,
    /// Local wall clock in ms at send time
    SyncForwardRequest(f64),
}

impl ServerEvent {
    /// Deserialize from JSON string
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

impl ClientEvent {
    /// Serialize to JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
