use super::{
    CommandError, CommandResult, Commands, linkpreview, parse_group_jid, parse_jid, require_args,
    thumbnail,
};
use crate::jid::Jid;
use crate::transport::message::{
    LinkThumbnail, ListPrompt, ListRow, ListSection, MediaHandle, MediaKind, MessageKey,
    OutgoingLink, OutgoingMedia, OutgoingMessage, PollCreation, Reaction,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Parsed `sendlist` arguments, before any I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListRequest {
    pub to: String,
    pub prompt: ListPrompt,
}

pub(crate) fn parse_list(args: &[String]) -> CommandResult<ListRequest> {
    require_args(args, 9)?;
    if args[6] != "--" {
        return Err(CommandError::invalid("Missing -- separator"));
    }
    let items = &args[7..];
    if items.len() % 3 != 0 {
        return Err(CommandError::invalid("Invalid number of items"));
    }
    let mut rows = Vec::with_capacity(items.len() / 3);
    for (index, chunk) in items.chunks(3).enumerate() {
        if chunk[2] != "/" {
            return Err(CommandError::invalid(format!(
                "Missing '/' separator at position {}",
                index * 3 + 2
            )));
        }
        rows.push(ListRow {
            row_id: format!("id{}", index + 1),
            title: chunk[0].clone(),
            description: chunk[1].clone(),
        });
    }
    Ok(ListRequest {
        to: args[0].clone(),
        prompt: ListPrompt {
            title: args[1].clone(),
            description: args[2].clone(),
            footer_text: args[3].clone(),
            button_text: args[4].clone(),
            sections: vec![ListSection {
                title: args[5].clone(),
                rows,
            }],
        },
    })
}

pub(crate) fn parse_poll(args: &[String]) -> CommandResult<PollCreation> {
    require_args(args, 7)?;
    let selectable_count: u32 = args[1]
        .parse()
        .map_err(|_| CommandError::invalid("Number of max answers must be an integer"))?;
    let rest = args[2..].join(" ");
    let Some((question, options)) = rest.split_once("--") else {
        return Err(CommandError::invalid("Missing '--' separator"));
    };
    Ok(PollCreation {
        name: question.trim().to_string(),
        options: options.split('/').map(|o| o.trim().to_string()).collect(),
        selectable_count,
    })
}

/// `me:` marks a message we sent ourselves.
pub(crate) fn reaction_key(chat: Jid, raw_id: &str) -> MessageKey {
    match raw_id.strip_prefix("me:") {
        Some(id) => MessageKey {
            chat,
            from_me: true,
            id: id.to_string(),
        },
        None => MessageKey {
            chat,
            from_me: false,
            id: raw_id.to_string(),
        },
    }
}

fn detect_mimetype(path: &Path, data: &[u8]) -> String {
    if let Ok(format) = image::guess_format(data) {
        return format.to_mime_type().to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

impl Commands {
    pub(super) async fn send(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let to = parse_jid(&args[0])?;
        self.deliver(&to, OutgoingMessage::Text(args[1..].join(" ")))
            .await
            .map(drop)
    }

    pub(super) async fn send_list(&self, args: &[String]) -> CommandResult {
        let request = parse_list(args)?;
        let to = parse_jid(&request.to)?;
        self.deliver(&to, OutgoingMessage::List(request.prompt))
            .await
            .map(drop)
    }

    pub(super) async fn send_poll(&self, args: &[String]) -> CommandResult {
        let to = parse_jid(args.first().ok_or(CommandError::Usage)?)?;
        let poll = parse_poll(args)?;
        let (question, options) = (poll.name.clone(), poll.options.clone());
        let receipt = self.deliver(&to, OutgoingMessage::Poll(poll)).await?;
        if self.session.mode().delivers_messages() {
            self.polls.record(&receipt.id, &question, &options);
        }
        Ok(())
    }

    pub(super) async fn send_link(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let to = parse_jid(&args[0])?;
        let url = &args[1];
        let text = if args.len() > 2 {
            format!("{url}\n\n{}", args[2..].join(" "))
        } else {
            url.clone()
        };
        let plain = OutgoingLink {
            text,
            matched_text: url.clone(),
            canonical_url: url.clone(),
            ..OutgoingLink::default()
        };

        let graph = match linkpreview::fetch_open_graph(&self.http, url).await {
            Ok(graph) if graph.is_complete() => graph,
            Ok(_) => {
                tracing::warn!("Could not fetch Open Graph data: incomplete preview for {url}");
                return self.deliver(&to, OutgoingMessage::Link(plain)).await.map(drop);
            }
            Err(e) => {
                tracing::warn!("Could not fetch Open Graph data: {e:#}");
                return self.deliver(&to, OutgoingMessage::Link(plain)).await.map(drop);
            }
        };

        let image_url = graph.image.clone().unwrap_or_default();
        let jpeg = linkpreview::fetch_image(&self.http, &image_url).await?;
        let (width, height) = linkpreview::image_dimensions(&jpeg)?;
        let upload = self
            .transport()
            .upload(jpeg.clone(), MediaKind::Image)
            .await
            .map_err(|source| CommandError::transport("upload thumbnail", Some(&to), source))?;

        let link = OutgoingLink {
            title: graph.title,
            description: graph.description,
            thumbnail: Some(LinkThumbnail {
                jpeg,
                width,
                height,
                upload,
            }),
            ..plain
        };
        self.deliver(&to, OutgoingMessage::Link(link)).await.map(drop)
    }

    pub(super) async fn send_document(&self, args: &[String]) -> CommandResult {
        require_args(args, 3)?;
        let to = parse_jid(&args[0])?;
        let path = PathBuf::from(&args[1]);
        let data = read_file(&path).await?;
        let mimetype = args
            .get(4)
            .cloned()
            .unwrap_or_else(|| detect_mimetype(&path, &data));
        let caption = args.get(3).cloned().unwrap_or_default();
        let upload = self.upload(&to, data, MediaKind::Document).await?;
        let media = OutgoingMedia {
            kind: MediaKind::Document,
            upload,
            mimetype,
            caption,
            title: Some(args[2].clone()),
            jpeg_thumbnail: None,
        };
        self.deliver(&to, OutgoingMessage::Media(media)).await.map(drop)
    }

    pub(super) async fn send_video(&self, args: &[String]) -> CommandResult {
        self.send_visual(args, MediaKind::Video).await
    }

    pub(super) async fn send_image(&self, args: &[String]) -> CommandResult {
        self.send_visual(args, MediaKind::Image).await
    }

    /// Images and videos carry a caption and an ffmpeg-made thumbnail.
    async fn send_visual(&self, args: &[String], kind: MediaKind) -> CommandResult {
        require_args(args, 2)?;
        let to = parse_jid(&args[0])?;
        let path = PathBuf::from(&args[1]);
        let data = read_file(&path).await?;
        let thumbnail = thumbnail::create(&path)
            .await
            .map_err(|e| e.context("Error creating thumbnail"))?;
        let mimetype = detect_mimetype(&path, &data);
        let upload = self.upload(&to, data, kind).await?;
        let media = OutgoingMedia {
            kind,
            upload,
            mimetype,
            caption: args[2..].join(" "),
            title: None,
            jpeg_thumbnail: Some(thumbnail),
        };
        self.deliver(&to, OutgoingMessage::Media(media)).await.map(drop)
    }

    pub(super) async fn send_audio(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let to = parse_jid(&args[0])?;
        let path = PathBuf::from(&args[1]);
        let data = read_file(&path).await?;
        let mimetype = detect_mimetype(&path, &data);
        let upload = self.upload(&to, data, MediaKind::Audio).await?;
        let media = OutgoingMedia {
            kind: MediaKind::Audio,
            upload,
            mimetype,
            caption: String::new(),
            title: None,
            jpeg_thumbnail: None,
        };
        self.deliver(&to, OutgoingMessage::Media(media)).await.map(drop)
    }

    pub(super) async fn react(&self, args: &[String]) -> CommandResult {
        require_args(args, 3)?;
        let to = parse_jid(&args[0])?;
        let text = if args[2] == "remove" {
            String::new()
        } else {
            args[2].clone()
        };
        let reaction = Reaction {
            key: reaction_key(to.clone(), &args[1]),
            text,
            sender_timestamp_ms: Utc::now().timestamp_millis(),
        };
        self.deliver(&to, OutgoingMessage::Reaction(reaction))
            .await
            .map(drop)
    }

    pub(super) async fn revoke(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let to = parse_jid(&args[0])?;
        let revoke = OutgoingMessage::Revoke {
            chat: to.clone(),
            message_id: args[1].clone(),
        };
        self.deliver(&to, revoke).await.map(drop)
    }

    pub(super) async fn mark_read(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let chat = parse_jid(&args[0])?;
        self.transport()
            .mark_read(&chat, args[1..].to_vec())
            .await
            .map_err(|source| CommandError::transport("mark as read", Some(&chat), source))?;
        tracing::info!("Mark as read sent");
        Ok(())
    }

    /// Send the same text to every member of a group, one direct message each.
    pub(super) async fn batch_message_group_members(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let group = parse_group_jid(&args[0])?;
        let info = self
            .transport()
            .group_info(&group)
            .await
            .map_err(|source| CommandError::transport("get group info", Some(&group), source))?;
        let own = self.session.identity();
        let text = args[1..].join(" ");
        for participant in &info.participants {
            let is_self = own.as_ref().is_some_and(|id| {
                participant.jid == id.device_jid || participant.jid.to_non_ad() == id.default_jid
            });
            if is_self {
                continue;
            }
            if let Err(e) = self
                .deliver(&participant.jid, OutgoingMessage::Text(text.clone()))
                .await
            {
                tracing::error!(command = "batchmessagegroupmembers", "{e}");
            }
        }
        Ok(())
    }

    async fn upload(&self, to: &Jid, data: Vec<u8>, kind: MediaKind) -> CommandResult<MediaHandle> {
        self.transport().upload(data, kind).await.map_err(|source| {
            CommandError::transport(format!("upload {}", kind.as_str()), Some(to), source)
        })
    }
}

async fn read_file(path: &Path) -> CommandResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|source| CommandError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn list_builds_rows_with_sequential_ids() {
        let request =
            parse_list(&argv("123 Menu Pick footer Open Mains -- Pizza cheesy / Soup hot /")).unwrap();
        assert_eq!(request.to, "123");
        assert_eq!(request.prompt.button_text, "Open");
        let section = &request.prompt.sections[0];
        assert_eq!(section.title, "Mains");
        assert_eq!(section.rows.len(), 2);
        assert_eq!(section.rows[1].row_id, "id2");
        assert_eq!(section.rows[1].title, "Soup");
        assert_eq!(section.rows[1].description, "hot");
    }

    #[test]
    fn list_requires_separator_and_triples() {
        let missing = parse_list(&argv("123 a b c d e X h1 d1 /")).unwrap_err();
        assert_eq!(missing.to_string(), "Missing -- separator");

        let uneven = parse_list(&argv("123 a b c d e -- h1 d1 / h2")).unwrap_err();
        assert_eq!(uneven.to_string(), "Invalid number of items");

        let slash = parse_list(&argv("123 a b c d e -- h1 d1 x")).unwrap_err();
        assert_eq!(slash.to_string(), "Missing '/' separator at position 2");

        assert!(matches!(
            parse_list(&argv("123 a b")),
            Err(CommandError::Usage)
        ));
    }

    #[test]
    fn poll_splits_question_and_options() {
        let poll = parse_poll(&argv("123 2 Where to eat? -- Pizza place / Sushi bar / Tacos")).unwrap();
        assert_eq!(poll.name, "Where to eat?");
        assert_eq!(poll.options, vec!["Pizza place", "Sushi bar", "Tacos"]);
        assert_eq!(poll.selectable_count, 2);
    }

    #[test]
    fn poll_rejects_bad_input() {
        let err = parse_poll(&argv("123 many q -- a / b / c")).unwrap_err();
        assert_eq!(err.to_string(), "Number of max answers must be an integer");

        let err = parse_poll(&argv("123 1 question a / b / c")).unwrap_err();
        assert_eq!(err.to_string(), "Missing '--' separator");
        assert!(err.is_input_error());
    }

    #[test]
    fn reaction_key_detects_own_messages() {
        let chat = Jid::user("123");
        let own = reaction_key(chat.clone(), "me:ABC");
        assert!(own.from_me);
        assert_eq!(own.id, "ABC");
        let theirs = reaction_key(chat, "ABC");
        assert!(!theirs.from_me);
    }

    #[test]
    fn mimetype_prefers_content_then_extension() {
        let mut png = Vec::new();
        image::RgbImage::new(1, 1)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(detect_mimetype(Path::new("photo.bin"), &png), "image/png");
        assert_eq!(detect_mimetype(Path::new("song.mp3"), b"ID3"), "audio/mpeg");
        assert_eq!(
            detect_mimetype(Path::new("blob"), b"\x00\x01"),
            "application/octet-stream"
        );
    }
}
