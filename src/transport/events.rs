use super::message::MessageEvent;
use crate::jid::Jid;
use chrono::{DateTime, Utc};

/// App-state patch that carries the push name and other account-critical settings.
pub const CRITICAL_BLOCK: &str = "critical_block";

/// Everything the transport reports back to the agent.
#[derive(Debug, Clone)]
pub enum Event {
    /// The socket is open and authenticated.
    Connected,
    /// Another client took over this session.
    StreamReplaced,
    Message(Box<MessageEvent>),
    Receipt(Receipt),
    Presence(PresenceUpdate),
    AppStateSyncComplete {
        name: String,
    },
    AppState {
        index: Vec<String>,
    },
    PushNameSetting {
        name: String,
    },
    OfflineSyncCompleted {
        count: usize,
    },
    KeepAliveTimeout {
        error_count: u32,
    },
    KeepAliveRestored,
    Disconnected,
    LoggedOut {
        on_connect: bool,
        reason: String,
    },
    Blocklist(BlocklistChange),
    QrCode {
        code: String,
    },
    PairingCode {
        code: String,
    },
    PairSuccess {
        id: Jid,
        platform: String,
        business_name: String,
    },
    /// An event category this build does not model.
    Unknown(String),
}

impl Event {
    pub fn name(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::StreamReplaced => "stream_replaced",
            Self::Message(_) => "message",
            Self::Receipt(_) => "receipt",
            Self::Presence(_) => "presence",
            Self::AppStateSyncComplete { .. } => "app_state_sync_complete",
            Self::AppState { .. } => "app_state",
            Self::PushNameSetting { .. } => "push_name_setting",
            Self::OfflineSyncCompleted { .. } => "offline_sync_completed",
            Self::KeepAliveTimeout { .. } => "keepalive_timeout",
            Self::KeepAliveRestored => "keepalive_restored",
            Self::Disconnected => "disconnected",
            Self::LoggedOut { .. } => "logged_out",
            Self::Blocklist(_) => "blocklist",
            Self::QrCode { .. } => "qr_code",
            Self::PairingCode { .. } => "pairing_code",
            Self::PairSuccess { .. } => "pair_success",
            Self::Unknown(name) => name,
        }
    }
}

/// A new device asks to be linked to the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRequest {
    pub jid: Jid,
    pub platform: String,
    pub business_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
    ReadSelf,
    Played,
    Other,
}

#[derive(Debug, Clone)]
pub struct Receipt {
    pub message_ids: Vec<String>,
    pub chat: Jid,
    pub sender: Jid,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

impl Receipt {
    pub fn source_string(&self) -> String {
        if self.sender == self.chat {
            self.chat.to_string()
        } else {
            format!("{} in {}", self.sender, self.chat)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceUpdate {
    pub from: Jid,
    pub unavailable: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlocklistAction {
    Block,
    Unblock,
}

impl BlocklistAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Unblock => "unblock",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlocklistChange {
    /// `None` when the server replaced the whole list.
    pub action: Option<String>,
    pub changes: Vec<(Jid, BlocklistAction)>,
}
