//! Inbound message normalization.
//!
//! Each message event in `both` mode becomes at most one flat [`Record`]
//! that is logged and handed to [`Delivery`]. Anything that cannot be
//! represented completely is dropped; there are no partial records.

pub mod media;
pub mod record;

pub use record::Record;

use crate::config::Config;
use crate::delivery::Delivery;
use crate::jid::Jid;
use crate::polls::PollStore;
use crate::session::Session;
use crate::transport::TransportError;
use crate::transport::message::{MessageEvent, MessageInfo, MessageKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Failed to save link preview thumbnail for {0}: thumbnail is empty")]
    EmptyThumbnail(String),
    #[error("Failed to decrypt vote for poll {poll_id}: {source}")]
    PollDecrypt {
        poll_id: String,
        #[source]
        source: TransportError,
    },
    #[error("No pending poll matches vote for {0}")]
    UnknownPoll(String),
    #[error("Failed to download {kind} in message {message_id}: {source}")]
    Download {
        kind: &'static str,
        message_id: String,
        #[source]
        source: TransportError,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct NormalizerOptions {
    /// Control-plane port, echoed in every record.
    pub port: u16,
    pub workspace: PathBuf,
    pub save_media: bool,
    /// Remove produced files after this long.
    pub auto_delete: Option<Duration>,
}

impl NormalizerOptions {
    pub fn from_config(config: &Config, workspace: PathBuf) -> Self {
        Self {
            port: config.gateway.port,
            workspace,
            save_media: config.media.save_media,
            auto_delete: config
                .media
                .auto_delete
                .then(|| Duration::from_secs(config.media.auto_delete_secs)),
        }
    }
}

/// Where a message is filed, after self-chat and status resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub receiver: String,
    pub is_group: bool,
    pub is_status: bool,
}

/// Resolve the conversation a message belongs to.
///
/// A message someone else sends to a chat with themselves, and any status
/// update, is filed under our own default address. Status wins over
/// self-chat because the status pseudo-chat is never a sender.
pub fn resolve_conversation(info: &MessageInfo, default_jid: Option<&Jid>) -> Conversation {
    let mut receiver = info.chat.to_string();
    if !info.is_from_me && info.sender == info.chat {
        if let Some(own) = default_jid {
            receiver = own.to_string();
        }
    }

    let is_status = info.chat.is_status_broadcast();
    if is_status {
        receiver = default_jid.map(ToString::to_string).unwrap_or_default();
    }

    Conversation {
        receiver,
        is_group: info.is_group && !is_status,
        is_status,
    }
}

pub struct Normalizer {
    session: Arc<Session>,
    polls: Arc<PollStore>,
    delivery: Delivery,
    options: NormalizerOptions,
}

impl Normalizer {
    pub fn new(
        session: Arc<Session>,
        polls: Arc<PollStore>,
        delivery: Delivery,
        options: NormalizerOptions,
    ) -> Self {
        Self {
            session,
            polls,
            delivery,
            options,
        }
    }

    /// Wait for the group directory, normalize, then log and deliver.
    pub async fn process(&self, event: MessageEvent) {
        self.session.directory().wait_fresh().await;

        match self.normalize(&event).await {
            Ok(Some(record)) => {
                tracing::info!("{}", record.to_json());
                if let (Some(delay), Some(path)) = (self.options.auto_delete, record.file()) {
                    media::schedule_delete(path.to_path_buf(), delay);
                }
                self.delivery.dispatch(record);
            }
            Ok(None) => {
                tracing::debug!(
                    "Ignoring unsupported message {} from {}",
                    event.info.id,
                    event.info.source_string()
                );
            }
            Err(e) => {
                tracing::error!(message_id = %event.info.id, "{e}");
            }
        }
    }

    /// Build the record for one message. `Ok(None)` means the message kind is not delivered.
    pub async fn normalize(&self, event: &MessageEvent) -> Result<Option<Record>, NormalizeError> {
        let info = &event.info;
        let message = &event.message;
        let default_jid = self.session.default_jid();
        let conversation = resolve_conversation(info, default_jid.as_ref());

        let mut record = Record::new();
        record
            .set("port", self.options.port.to_string())
            .set("sender_jid", info.sender.to_string())
            .set("receiver_jid", conversation.receiver.clone())
            .set("sender_pushname", info.push_name.clone())
            .set("is_from_myself", info.is_from_me.to_string())
            .set("is_group", conversation.is_group.to_string())
            .set("time_stamp", info.timestamp.timestamp().to_string())
            .set("message_id", info.id.clone());
        if conversation.is_group {
            record.set("group_name", self.session.directory().name_of(&info.chat));
        }

        let text_type = if conversation.is_status {
            "status_message"
        } else {
            "text_message"
        };

        if let Some(text) = message.conversation.as_deref().filter(|t| !t.is_empty()) {
            record.set("type", "text_message").set("message", text);
            return Ok(Some(record));
        }

        if let Some(extended) = &message.extended_text {
            return match info.kind {
                MessageKind::Text => {
                    record.set("type", text_type).set("message", extended.text.clone());
                    Ok(Some(record))
                }
                MessageKind::Media if !extended.canonical_url.is_empty() => {
                    if extended.jpeg_thumbnail.is_empty() {
                        return Err(NormalizeError::EmptyThumbnail(info.id.clone()));
                    }
                    let path = media::write_media(
                        &self.options.workspace,
                        "link",
                        &info.id,
                        "jpg",
                        &extended.jpeg_thumbnail,
                    )
                    .await?;
                    tracing::info!("Saved link preview thumbnail in message to {}", path.display());
                    let link_type = if conversation.is_status {
                        "status_message"
                    } else {
                        "link_message"
                    };
                    record.attach_file(path);
                    record
                        .set("type", link_type)
                        .set("message", extended.text.clone())
                        .set("link_matched_text", extended.matched_text.clone())
                        .set("link_canonical_url", extended.canonical_url.clone())
                        .set("link_description", extended.description.clone())
                        .set("link_title", extended.title.clone());
                    Ok(Some(record))
                }
                _ => Ok(None),
            };
        }

        if let Some(response) = &message.buttons_response {
            let quoted = response.quoted.clone().unwrap_or_default();
            record
                .set("type", "button_response_message")
                .set("button_selected_button", response.selected_display_text.clone())
                .set("button_title", quoted.text)
                .set("button_body", quoted.content_text)
                .set("button_footer", quoted.footer_text)
                .set("origin_message_id", response.stanza_id.clone());
            return Ok(Some(record));
        }

        if let Some(response) = &message.list_response {
            let quoted = response.quoted.clone().unwrap_or_default();
            let header = quoted
                .sections
                .first()
                .map(|section| section.title.clone())
                .unwrap_or_default();
            record
                .set("type", "list_response_message")
                .set("list_selected_title", response.title.clone())
                .set("list_selected_description", response.description.clone())
                .set("list_title", quoted.title)
                .set("list_body", quoted.description)
                .set("list_footer", quoted.footer_text)
                .set("list_button_text", quoted.button_text)
                .set("list_header", header)
                .set("origin_message_id", response.stanza_id.clone());
            return Ok(Some(record));
        }

        if let Some(update) = &message.poll_update {
            let poll_id = update.poll_creation_id.clone();
            let selected = self
                .session
                .transport()
                .decrypt_poll_vote(event)
                .await
                .map_err(|source| NormalizeError::PollDecrypt {
                    poll_id: poll_id.clone(),
                    source,
                })?;
            let vote = self
                .polls
                .resolve_vote(&poll_id, &selected)
                .ok_or_else(|| NormalizeError::UnknownPoll(poll_id.clone()))?;
            record
                .set("type", "poll_response_message")
                .set("message_id", poll_id)
                .set("poll_question", vote.question);
            record.set_list("poll_selected_options", vote.selected);
            return Ok(Some(record));
        }

        if self.options.save_media {
            if let Some(attachment) = message.media() {
                let kind = attachment.kind.as_str();
                let bytes = self
                    .session
                    .transport()
                    .download(attachment)
                    .await
                    .map_err(|source| NormalizeError::Download {
                        kind,
                        message_id: info.id.clone(),
                        source,
                    })?;
                let ext = media::extension_for(&attachment.mimetype);
                let path = media::write_media(&self.options.workspace, kind, &info.id, &ext, &bytes)
                    .await?;
                tracing::info!("Saved {kind} in message to {}", path.display());
                record.attach_file(path);
                record
                    .set("type", format!("{kind}_message"))
                    .set("mimetype", attachment.mimetype.clone())
                    .set("message", attachment.caption.clone());
                if let Some(file_name) = &attachment.file_name {
                    record.set("file_name", file_name.clone());
                }
                return Ok(Some(record));
            }
        }

        Ok(None)
    }
}
