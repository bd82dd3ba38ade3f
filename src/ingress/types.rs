use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Everything the bridge needs to fetch and decrypt one audio payload.
///
/// The hash and key fields are opaque base64 strings passed through to the
/// gateway; `file_sha256` is additionally checked against the downloaded
/// plaintext when it decodes to a valid digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub direct_path: String,
    pub file_enc_sha256: String,
    pub file_sha256: String,
    pub media_key: String,
    pub file_length: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl MediaDescriptor {
    /// Compare the declared plaintext hash against `bytes`.
    ///
    /// Returns `None` when the descriptor's hash is not a well-formed
    /// base64 SHA-256 digest (the check is skipped, not failed).
    pub fn matches_plaintext_hash(&self, bytes: &[u8]) -> Option<bool> {
        let expected = general_purpose::STANDARD.decode(&self.file_sha256).ok()?;
        if expected.len() != 32 {
            return None;
        }
        let digest = Sha256::digest(bytes);
        Some(digest.as_slice() == expected.as_slice())
    }
}

/// One message as delivered by the bridge gateway (wire format).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeMessage {
    pub id: String,
    pub chat: String,
    pub sender: String,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio: Option<MediaDescriptor>,
    #[serde(default)]
    pub timestamp: i64,
}

/// One entry of the bridge's event stream. `event_id` is monotonically
/// increasing and acknowledged back through the poll offset.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeEvent {
    pub event_id: i64,
    #[serde(default)]
    pub message: Option<BridgeMessage>,
}

/// One received chat message, immutable once constructed.
///
/// Owned by the dispatcher for the duration of one verdict and, when the
/// verdict is `Process`, the job derived from it.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: Uuid,
    /// Platform message id, used to quote the original in replies.
    pub message_id: String,
    /// Chat JID the message arrived in (and where replies go).
    pub chat: String,
    /// User part of the sender JID, as stored in the exclusion list.
    pub sender: String,
    pub from_me: bool,
    pub is_group: bool,
    pub text: Option<String>,
    pub audio: Option<MediaDescriptor>,
    pub timestamp: i64,
}

impl InboundEvent {
    pub fn from_bridge(msg: BridgeMessage) -> Self {
        let timestamp = if msg.timestamp != 0 {
            msg.timestamp
        } else {
            chrono::Utc::now().timestamp()
        };
        Self {
            id: Uuid::new_v4(),
            message_id: msg.id,
            chat: msg.chat,
            sender: msg.sender,
            from_me: msg.from_me,
            is_group: msg.is_group,
            text: msg.text,
            audio: msg.audio,
            timestamp,
        }
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Metadata only; message text stays out of log lines.
        write!(
            f,
            "[{}] {} from {} in {} (group: {}, audio: {})",
            self.timestamp,
            self.id,
            self.sender,
            self.chat,
            self.is_group,
            self.audio.is_some()
        )
    }
}
