//! Operator command table.
//!
//! Commands arrive as argument vectors from three places: the command line,
//! interactive stdin, and the HTTP control plane. [`CommandName`] is the
//! closed vocabulary; the lower-cased name map is built from it once. Every
//! handler validates its arguments before touching the transport, so an
//! input error never has side effects.
//!
//! `stop` and `restart` are reserved: they are acknowledged by whoever owns
//! the process lifecycle and never reach a handler.

mod account;
mod group;
pub mod linkpreview;
mod media;
mod misc;
mod newsletter;
mod send;
pub mod thumbnail;

use crate::jid::{Jid, JidError, parse_group, parse_recipient};
use crate::polls::PollStore;
use crate::session::Session;
use crate::transport::message::{OutgoingMessage, SendReceipt};
use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

macro_rules! command_table {
    ($($variant:ident => $name:literal, $usage:literal;)+) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum CommandName {
            $($variant,)+
        }

        impl CommandName {
            pub const ALL: &'static [CommandName] = &[$(CommandName::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(CommandName::$variant => $name,)+
                }
            }

            /// Argument synopsis, without the leading `Usage:`.
            pub fn usage(self) -> &'static str {
                match self {
                    $(CommandName::$variant => $usage,)+
                }
            }
        }
    };
}

command_table! {
    // Send
    Send => "send", "send <jid> <text>";
    SendList => "sendlist", "sendlist <jid> <title> <text> <footer> <button text> <sub title> -- <heading 1> <description 1> / ...";
    SendPoll => "sendpoll", "sendpoll <jid> <max answers> <question> -- <option 1> / <option 2> / ...";
    SendLink => "sendlink", "sendlink <jid> <url/link> [text]";
    SendDoc => "senddoc", "senddoc <jid> <document path> <document file name> [caption] [mime-type]";
    SendVideo => "sendvid", "sendvid <jid> <video path> [caption]";
    SendAudio => "sendaudio", "sendaudio <jid> <audio path>";
    SendImage => "sendimg", "sendimg <jid> <image path> [caption]";
    React => "react", "react <jid> <message ID> <reaction>";
    Revoke => "revoke", "revoke <jid> <message ID>";
    MarkRead => "markread", "markread <jid> <message ID 1> [message ID X]";
    BatchMessageGroupMembers => "batchmessagegroupmembers", "batchmessagegroupmembers <group jid> <text>";
    // Groups
    GetGroup => "getgroup", "getgroup <group jid>";
    Subgroups => "subgroups", "subgroups <community jid>";
    CommunityParticipants => "communityparticipants", "communityparticipants <community jid>";
    GetInviteLink => "getinvitelink", "getinvitelink <group jid> [reset]";
    QueryInviteLink => "queryinvitelink", "queryinvitelink <link>";
    JoinInviteLink => "joininvitelink", "joininvitelink <link>";
    UpdateParticipant => "updateparticipant", "updateparticipant <group jid> <participant jid> <add|remove|promote|demote>";
    GetRequestParticipant => "getrequestparticipant", "getrequestparticipant <group jid>";
    // Media
    MediaConn => "mediaconn", "mediaconn";
    GetAvatar => "getavatar", "getavatar <jid> [existing ID] [--preview] [--community]";
    // Account and privacy
    PairPhone => "pair-phone", "pair-phone <number>";
    Logout => "logout", "logout";
    SetPushName => "setpushname", "setpushname <name>";
    SetStatus => "setstatus", "setstatus <message>";
    PrivacySettings => "privacysettings", "privacysettings";
    SetPrivacySetting => "setprivacysetting", "setprivacysetting <setting> <value>";
    GetStatusPrivacy => "getstatusprivacy", "getstatusprivacy";
    SetDisappearTimer => "setdisappeartimer", "setdisappeartimer <jid> <days>";
    SetDefaultDisappearTimer => "setdefaultdisappeartimer", "setdefaultdisappeartimer <days>";
    GetBlocklist => "getblocklist", "getblocklist";
    Block => "block", "block <jid>";
    Unblock => "unblock", "unblock <jid>";
    // Newsletters
    ListNewsletters => "listnewsletters", "listnewsletters";
    GetNewsletter => "getnewsletter", "getnewsletter <jid>";
    GetNewsletterInvite => "getnewsletterinvite", "getnewsletterinvite <key>";
    LiveSubscribeNewsletter => "livesubscribenewsletter", "livesubscribenewsletter <jid>";
    GetNewsletterMessages => "getnewslettermessages", "getnewslettermessages <jid> [count] [before id]";
    CreateNewsletter => "createnewsletter", "createnewsletter <name>";
    // Misc
    Reconnect => "reconnect", "reconnect";
    AppState => "appstate", "appstate [resync] <types...>";
    RequestAppStateKey => "request-appstate-key", "request-appstate-key <ids...>";
    UnavailableRequest => "unavailable-request", "unavailable-request <chat JID> <sender JID> <message ID>";
    CheckUser => "checkuser", "checkuser <phone numbers...>";
    SubscribePresence => "subscribepresence", "subscribepresence <jid>";
    Presence => "presence", "presence <available/unavailable>";
    ChatPresence => "chatpresence", "chatpresence <jid> <composing/paused> [audio]";
    GetUser => "getuser", "getuser <jids...>";
    Raw => "raw", "raw <json node>";
    QueryBusinessLink => "querybusinesslink", "querybusinesslink <link>";
    ListUsers => "listusers", "listusers";
    ListGroups => "listgroups", "listgroups";
    Archive => "archive", "archive <jid> <true/false>";
    Mute => "mute", "mute <jid> <true/false> [hours] (default is 8hrs, if 0 then indefinitely)";
    Pin => "pin", "pin <jid> <true/false>";
    LabelChat => "labelchat", "labelchat <jid> <labelID> <true/false>";
    LabelMessage => "labelmessage", "labelmessage <jid> <labelID> <messageID> <true/false>";
    EditLabel => "editlabel", "editlabel <labelID> <name> <color> <true/false>";
    // Reserved
    Stop => "stop", "stop";
    Restart => "restart", "restart";
}

fn name_map() -> &'static HashMap<&'static str, CommandName> {
    static MAP: OnceLock<HashMap<&'static str, CommandName>> = OnceLock::new();
    MAP.get_or_init(|| {
        CommandName::ALL
            .iter()
            .map(|name| (name.as_str(), *name))
            .collect()
    })
}

impl CommandName {
    /// Case-insensitive lookup.
    pub fn lookup(name: &str) -> Option<Self> {
        name_map().get(name.to_lowercase().as_str()).copied()
    }

    /// Lifecycle commands handled by the process owner, not by a handler.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Stop | Self::Restart)
    }

    /// Everything except pairing needs a logged-in session.
    pub fn requires_login(self) -> bool {
        !matches!(self, Self::PairPhone)
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument vector, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// No arguments at all; nothing runs.
    Empty,
    Unknown(String),
    Stop,
    Restart,
    Run {
        name: CommandName,
        args: Vec<String>,
    },
}

impl Invocation {
    pub fn parse(mut args: Vec<String>) -> Self {
        if args.is_empty() {
            return Self::Empty;
        }
        let raw = args.remove(0);
        match CommandName::lookup(&raw) {
            Some(CommandName::Stop) => Self::Stop,
            Some(CommandName::Restart) => Self::Restart,
            Some(name) => Self::Run { name, args },
            None => Self::Unknown(raw),
        }
    }

    /// Whitespace-split a line typed on stdin.
    pub fn parse_line(line: &str) -> Self {
        Self::parse(line.split_whitespace().map(str::to_string).collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("missing arguments")]
    Usage,
    #[error("{0}")]
    Invalid(String),
    #[error("Invalid JID {input:?}: {source}")]
    Jid {
        input: String,
        #[source]
        source: JidError,
    },
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to {action}{}: {source}", for_target(.target))]
    Transport {
        action: String,
        target: Option<String>,
        #[source]
        source: TransportError,
    },
    #[error("{0} is handled by the process owner")]
    Reserved(CommandName),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn for_target(target: &Option<String>) -> String {
    target
        .as_deref()
        .map(|t| format!(" for {t}"))
        .unwrap_or_default()
}

impl CommandError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn transport(action: impl Into<String>, target: Option<&Jid>, source: TransportError) -> Self {
        Self::Transport {
            action: action.into(),
            target: target.map(ToString::to_string),
            source,
        }
    }

    /// Bad arguments: nothing was sent.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Usage | Self::Invalid(_) | Self::Jid { .. })
    }
}

pub type CommandResult<T = ()> = Result<T, CommandError>;

fn require_args(args: &[String], min: usize) -> CommandResult {
    if args.len() < min {
        return Err(CommandError::Usage);
    }
    Ok(())
}

fn parse_jid(raw: &str) -> CommandResult<Jid> {
    parse_recipient(raw).map_err(|source| CommandError::Jid {
        input: raw.to_string(),
        source,
    })
}

fn parse_group_jid(raw: &str) -> CommandResult<Jid> {
    parse_group(raw).map_err(|source| CommandError::Jid {
        input: raw.to_string(),
        source,
    })
}

/// Boolean argument in the forms operators are used to (`true`, `1`, `t`, ...).
fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// Runs commands against the shared session.
pub struct Commands {
    session: Arc<Session>,
    polls: Arc<PollStore>,
    http: reqwest::Client,
}

impl Commands {
    pub fn new(session: Arc<Session>, polls: Arc<PollStore>) -> Self {
        Self {
            session,
            polls,
            http: linkpreview::http_client(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.session.transport()
    }

    /// Run a command and log its failure; failures never propagate further.
    pub async fn run(&self, name: CommandName, args: &[String]) {
        let Err(e) = self.execute(name, args).await else {
            return;
        };
        match e {
            CommandError::Usage => {
                tracing::error!(command = %name, "Usage: {}", name.usage());
            }
            ref input if input.is_input_error() => {
                tracing::error!(command = %name, "{input}");
                tracing::error!(command = %name, "Usage: {}", name.usage());
            }
            other => tracing::error!(command = %name, "{other}"),
        }
    }

    pub async fn execute(&self, name: CommandName, args: &[String]) -> CommandResult {
        use CommandName as C;
        match name {
            C::Send => self.send(args).await,
            C::SendList => self.send_list(args).await,
            C::SendPoll => self.send_poll(args).await,
            C::SendLink => self.send_link(args).await,
            C::SendDoc => self.send_document(args).await,
            C::SendVideo => self.send_video(args).await,
            C::SendAudio => self.send_audio(args).await,
            C::SendImage => self.send_image(args).await,
            C::React => self.react(args).await,
            C::Revoke => self.revoke(args).await,
            C::MarkRead => self.mark_read(args).await,
            C::BatchMessageGroupMembers => self.batch_message_group_members(args).await,
            C::GetGroup => self.get_group(args).await,
            C::Subgroups => self.subgroups(args).await,
            C::CommunityParticipants => self.community_participants(args).await,
            C::GetInviteLink => self.get_invite_link(args).await,
            C::QueryInviteLink => self.query_invite_link(args).await,
            C::JoinInviteLink => self.join_invite_link(args).await,
            C::UpdateParticipant => self.update_participant(args).await,
            C::GetRequestParticipant => self.get_request_participant(args).await,
            C::MediaConn => self.media_conn().await,
            C::GetAvatar => self.get_avatar(args).await,
            C::PairPhone => self.pair_phone(args).await,
            C::Logout => self.logout().await,
            C::SetPushName => self.set_push_name(args).await,
            C::SetStatus => self.set_status(args).await,
            C::PrivacySettings => self.privacy_settings().await,
            C::SetPrivacySetting => self.set_privacy_setting(args).await,
            C::GetStatusPrivacy => self.status_privacy().await,
            C::SetDisappearTimer => self.set_disappear_timer(args).await,
            C::SetDefaultDisappearTimer => self.set_default_disappear_timer(args).await,
            C::GetBlocklist => self.get_blocklist().await,
            C::Block => self.update_blocklist(args, true).await,
            C::Unblock => self.update_blocklist(args, false).await,
            C::ListNewsletters => self.list_newsletters().await,
            C::GetNewsletter => self.get_newsletter(args).await,
            C::GetNewsletterInvite => self.get_newsletter_invite(args).await,
            C::LiveSubscribeNewsletter => self.live_subscribe_newsletter(args).await,
            C::GetNewsletterMessages => self.get_newsletter_messages(args).await,
            C::CreateNewsletter => self.create_newsletter(args).await,
            C::Reconnect => self.reconnect().await,
            C::AppState => self.app_state(args).await,
            C::RequestAppStateKey => self.request_app_state_key(args).await,
            C::UnavailableRequest => self.unavailable_request(args).await,
            C::CheckUser => self.check_user(args).await,
            C::SubscribePresence => self.subscribe_presence(args).await,
            C::Presence => self.presence(args).await,
            C::ChatPresence => self.chat_presence(args).await,
            C::GetUser => self.get_user(args).await,
            C::Raw => self.raw(args).await,
            C::QueryBusinessLink => self.query_business_link(args).await,
            C::ListUsers => self.list_users().await,
            C::ListGroups => self.list_groups().await,
            C::Archive => self.archive(args).await,
            C::Mute => self.mute(args).await,
            C::Pin => self.pin(args).await,
            C::LabelChat => self.label_chat(args).await,
            C::LabelMessage => self.label_message(args).await,
            C::EditLabel => self.edit_label(args).await,
            C::Stop | C::Restart => Err(CommandError::Reserved(name)),
        }
    }

    /// Send one message and log the server timestamp.
    async fn deliver(&self, to: &Jid, message: OutgoingMessage) -> CommandResult<SendReceipt> {
        let label = message.label();
        let receipt = self
            .transport()
            .send_message(to, message)
            .await
            .map_err(|source| CommandError::transport(format!("send {label}"), Some(to), source))?;
        tracing::info!(
            to = %to,
            "Sent {label} {} (server timestamp: {})",
            receipt.id,
            receipt.timestamp
        );
        Ok(receipt)
    }
}
