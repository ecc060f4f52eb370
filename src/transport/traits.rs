use super::events::{BlocklistAction, Event, PairingRequest};
use super::message::{GroupInfo, MediaAttachment, MediaHandle, MediaKind, MessageEvent, OutgoingMessage, SendReceipt};
use crate::jid::Jid;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Receives everything the transport reports, in delivery order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_event(&self, event: Event);

    /// Decide whether a new device may be linked. `true` accepts.
    async fn approve_pairing(&self, request: PairingRequest) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Available,
    Unavailable,
}

impl Presence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "available" => Some(Self::Available),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

impl ChatPresence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "composing" => Some(Self::Composing),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "promote" => Some(Self::Promote),
            "demote" => Some(Self::Demote),
            _ => None,
        }
    }
}

/// Account-level app-state mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppStatePatch {
    PushName(String),
    Archive {
        target: Jid,
        archive: bool,
    },
    /// `duration` of `None` mutes indefinitely.
    Mute {
        target: Jid,
        mute: bool,
        duration: Option<Duration>,
    },
    Pin {
        target: Jid,
        pin: bool,
    },
    LabelChat {
        target: Jid,
        label_id: String,
        labeled: bool,
    },
    LabelMessage {
        target: Jid,
        label_id: String,
        message_id: String,
        labeled: bool,
    },
    LabelEdit {
        label_id: String,
        name: String,
        color: i32,
        deleted: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePictureParams {
    pub preview: bool,
    pub is_community: bool,
    pub existing_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilePicture {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserCheck {
    pub query: String,
    pub is_in: bool,
    pub jid: Option<Jid>,
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsletterSummary {
    pub jid: Jid,
    pub name: String,
}

/// Handle to the messaging SDK.
///
/// The core methods are required. Account, group, privacy and newsletter
/// operations default to [`TransportError::Unsupported`] so a transport only
/// implements what its SDK exposes. Structured responses that the agent only
/// logs come back as `serde_json::Value`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Install the event sink. Must be called before [`Transport::connect`].
    fn register_sink(&self, sink: Arc<dyn EventSink>);

    async fn connect(&self) -> TransportResult<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn is_logged_in(&self) -> bool;

    /// Device-qualified address of this session, once paired.
    fn own_jid(&self) -> Option<Jid>;

    /// Display name stored for this account. Empty until synced.
    fn push_name(&self) -> String;

    async fn send_presence(&self, presence: Presence) -> TransportResult<()>;

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> TransportResult<SendReceipt>;

    async fn joined_groups(&self) -> TransportResult<Vec<GroupInfo>>;

    async fn group_info(&self, group: &Jid) -> TransportResult<GroupInfo>;

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> TransportResult<MediaHandle>;

    async fn download(&self, media: &MediaAttachment) -> TransportResult<Vec<u8>>;

    /// SHA-256 hashes of the options selected in a poll vote.
    async fn decrypt_poll_vote(&self, message: &MessageEvent) -> TransportResult<Vec<Vec<u8>>>;

    // ── Account & privacy ───────────────────────────────────────

    /// Start phone-number linking; returns the code to type on the phone.
    async fn pair_phone(&self, _phone: &str) -> TransportResult<String> {
        Err(TransportError::Unsupported("pair-phone"))
    }

    async fn logout(&self) -> TransportResult<()> {
        Err(TransportError::Unsupported("logout"))
    }

    async fn send_app_state(&self, _patch: AppStatePatch) -> TransportResult<()> {
        Err(TransportError::Unsupported("app state patches"))
    }

    async fn set_status_message(&self, _text: &str) -> TransportResult<()> {
        Err(TransportError::Unsupported("setstatus"))
    }

    async fn privacy_settings(&self) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("privacysettings"))
    }

    async fn set_privacy_setting(&self, _setting: &str, _value: &str) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("setprivacysetting"))
    }

    async fn status_privacy(&self) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getstatusprivacy"))
    }

    async fn set_disappearing_timer(&self, _chat: &Jid, _timer: Duration) -> TransportResult<()> {
        Err(TransportError::Unsupported("setdisappeartimer"))
    }

    async fn set_default_disappearing_timer(&self, _timer: Duration) -> TransportResult<()> {
        Err(TransportError::Unsupported("setdefaultdisappeartimer"))
    }

    async fn blocklist(&self) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getblocklist"))
    }

    async fn update_blocklist(&self, _jid: &Jid, _action: BlocklistAction) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("block/unblock"))
    }

    // ── Groups ──────────────────────────────────────────────────

    async fn subgroups(&self, _community: &Jid) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("subgroups"))
    }

    async fn community_participants(&self, _community: &Jid) -> TransportResult<Vec<Jid>> {
        Err(TransportError::Unsupported("communityparticipants"))
    }

    async fn invite_link(&self, _group: &Jid, _reset: bool) -> TransportResult<String> {
        Err(TransportError::Unsupported("getinvitelink"))
    }

    async fn query_invite_link(&self, _code: &str) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("queryinvitelink"))
    }

    async fn join_invite_link(&self, _code: &str) -> TransportResult<Jid> {
        Err(TransportError::Unsupported("joininvitelink"))
    }

    async fn update_participant(
        &self,
        _group: &Jid,
        _participant: &Jid,
        _action: ParticipantAction,
    ) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("updateparticipant"))
    }

    async fn group_join_requests(&self, _group: &Jid) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getrequestparticipant"))
    }

    // ── Media ───────────────────────────────────────────────────

    async fn media_conn(&self) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("mediaconn"))
    }

    async fn profile_picture(
        &self,
        _jid: &Jid,
        _params: ProfilePictureParams,
    ) -> TransportResult<Option<ProfilePicture>> {
        Err(TransportError::Unsupported("getavatar"))
    }

    // ── Newsletters ─────────────────────────────────────────────

    async fn subscribed_newsletters(&self) -> TransportResult<Vec<NewsletterSummary>> {
        Err(TransportError::Unsupported("listnewsletters"))
    }

    async fn newsletter_info(&self, _jid: &Jid) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getnewsletter"))
    }

    async fn newsletter_info_with_invite(&self, _key: &str) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getnewsletterinvite"))
    }

    async fn newsletter_subscribe_live(&self, _jid: &Jid) -> TransportResult<Duration> {
        Err(TransportError::Unsupported("livesubscribenewsletter"))
    }

    async fn newsletter_messages(
        &self,
        _jid: &Jid,
        _count: u32,
        _before: Option<u64>,
    ) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getnewslettermessages"))
    }

    async fn create_newsletter(&self, _name: &str) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("createnewsletter"))
    }

    // ── Misc ────────────────────────────────────────────────────

    async fn fetch_app_state(&self, _name: &str, _full_sync: bool) -> TransportResult<()> {
        Err(TransportError::Unsupported("appstate"))
    }

    async fn request_app_state_keys(&self, _key_ids: Vec<Vec<u8>>) -> TransportResult<()> {
        Err(TransportError::Unsupported("request-appstate-key"))
    }

    async fn is_on_whatsapp(&self, _phones: Vec<String>) -> TransportResult<Vec<UserCheck>> {
        Err(TransportError::Unsupported("checkuser"))
    }

    async fn subscribe_presence(&self, _jid: &Jid) -> TransportResult<()> {
        Err(TransportError::Unsupported("subscribepresence"))
    }

    async fn send_chat_presence(
        &self,
        _jid: &Jid,
        _presence: ChatPresence,
        _audio: bool,
    ) -> TransportResult<()> {
        Err(TransportError::Unsupported("chatpresence"))
    }

    async fn mark_read(&self, _chat: &Jid, _message_ids: Vec<String>) -> TransportResult<()> {
        Err(TransportError::Unsupported("markread"))
    }

    async fn user_info(&self, _jids: Vec<Jid>) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("getuser"))
    }

    async fn send_raw_node(&self, _node: serde_json::Value) -> TransportResult<()> {
        Err(TransportError::Unsupported("raw"))
    }

    async fn resolve_business_link(&self, _code: &str) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("querybusinesslink"))
    }

    async fn contacts(&self) -> TransportResult<serde_json::Value> {
        Err(TransportError::Unsupported("listusers"))
    }
}
