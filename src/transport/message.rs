//! Transport-neutral message model.
//!
//! These mirror the handful of protocol message shapes the agent reads or
//! writes. A concrete transport converts its own protobuf types to and from
//! these at the boundary.

use crate::jid::Jid;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stanza classification reported by the transport alongside a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Text,
    Media,
    Reaction,
    Poll,
    Other,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
            Self::Reaction => "reaction",
            Self::Poll => "poll",
            Self::Other => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub id: String,
    pub sender: Jid,
    pub chat: Jid,
    pub push_name: String,
    pub timestamp: DateTime<Utc>,
    pub is_from_me: bool,
    pub is_group: bool,
    pub kind: MessageKind,
}

impl MessageInfo {
    /// `chat` or `chat (sender)` for log lines.
    pub fn source_string(&self) -> String {
        if self.sender == self.chat {
            self.chat.to_string()
        } else {
            format!("{} in {}", self.sender, self.chat)
        }
    }
}

/// One inbound message: metadata plus whichever payload fields were set.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: MessageContent,
}

#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text: Option<ExtendedText>,
    pub buttons_response: Option<ButtonsResponse>,
    pub list_response: Option<ListResponse>,
    pub poll_update: Option<PollUpdate>,
    pub image: Option<MediaAttachment>,
    pub video: Option<MediaAttachment>,
    pub audio: Option<MediaAttachment>,
    pub document: Option<MediaAttachment>,
    pub sticker: Option<MediaAttachment>,
}

impl MessageContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Self::default()
        }
    }

    /// First attached media payload, in protocol field order.
    pub fn media(&self) -> Option<&MediaAttachment> {
        self.image
            .as_ref()
            .or(self.video.as_ref())
            .or(self.audio.as_ref())
            .or(self.document.as_ref())
            .or(self.sticker.as_ref())
    }
}

/// Rich text: formatted text, or a link with its preview.
#[derive(Debug, Clone, Default)]
pub struct ExtendedText {
    pub text: String,
    pub matched_text: String,
    pub canonical_url: String,
    pub description: String,
    pub title: String,
    pub jpeg_thumbnail: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ButtonsResponse {
    pub selected_display_text: String,
    /// Id of the quoted buttons message.
    pub stanza_id: String,
    pub quoted: Option<ButtonsPrompt>,
}

#[derive(Debug, Clone, Default)]
pub struct ButtonsPrompt {
    pub text: String,
    pub content_text: String,
    pub footer_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListResponse {
    pub title: String,
    pub description: String,
    pub stanza_id: String,
    pub quoted: Option<ListPrompt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPrompt {
    pub title: String,
    pub description: String,
    pub footer_text: String,
    pub button_text: String,
    pub sections: Vec<ListSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRow {
    pub row_id: String,
    pub title: String,
    pub description: String,
}

/// Encrypted poll vote. Decryption is delegated to the transport.
#[derive(Debug, Clone, Default)]
pub struct PollUpdate {
    pub poll_creation_id: String,
    pub encrypted_payload: Vec<u8>,
    pub encrypted_iv: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }
}

/// Location and keys of an encrypted media blob on the media servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaHandle {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_length: u64,
}

#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub mimetype: String,
    pub caption: String,
    pub file_name: Option<String>,
    pub handle: MediaHandle,
}

// ── Outgoing ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text(String),
    Link(OutgoingLink),
    List(ListPrompt),
    Poll(PollCreation),
    Media(OutgoingMedia),
    Reaction(Reaction),
    Revoke {
        chat: Jid,
        message_id: String,
    },
    /// Peer request asking our primary device to resend a message we could not decrypt.
    UnavailableRequest {
        chat: Jid,
        sender: Jid,
        message_id: String,
    },
}

impl OutgoingMessage {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text(_) => "message",
            Self::Link(_) => "link message",
            Self::List(_) => "list message",
            Self::Poll(_) => "poll message",
            Self::Media(media) => match media.kind {
                MediaKind::Image => "image message",
                MediaKind::Video => "video message",
                MediaKind::Audio => "audio message",
                MediaKind::Document => "document message",
                MediaKind::Sticker => "sticker message",
            },
            Self::Reaction(_) => "reaction",
            Self::Revoke { .. } => "revocation",
            Self::UnavailableRequest { .. } => "unavailable request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutgoingLink {
    pub text: String,
    pub matched_text: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<LinkThumbnail>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkThumbnail {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub upload: MediaHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCreation {
    pub name: String,
    pub options: Vec<String>,
    pub selectable_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub upload: MediaHandle,
    pub mimetype: String,
    pub caption: String,
    /// Document title shown in the chat bubble.
    pub title: Option<String>,
    pub jpeg_thumbnail: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKey {
    pub chat: Jid,
    pub from_me: bool,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub key: MessageKey,
    /// Empty text removes a previous reaction.
    pub text: String,
    pub sender_timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupInfo {
    #[serde(rename = "JID")]
    pub jid: Jid,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Participants", skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupParticipant {
    #[serde(rename = "JID")]
    pub jid: Jid,
    #[serde(rename = "IsAdmin")]
    pub is_admin: bool,
    #[serde(rename = "IsSuperAdmin")]
    pub is_super_admin: bool,
}
