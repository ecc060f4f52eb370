use super::{CommandError, CommandResult, Commands, parse_jid, require_args};

const DEFAULT_MESSAGE_COUNT: u32 = 100;

/// `[count] [before id]` for `getnewslettermessages`.
pub(crate) fn message_window(rest: &[String]) -> CommandResult<(u32, Option<u64>)> {
    let count = match rest.first() {
        Some(raw) => raw
            .parse()
            .map_err(|e| CommandError::invalid(format!("Invalid count: {e}")))?,
        None => DEFAULT_MESSAGE_COUNT,
    };
    let before = rest
        .get(1)
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .map_err(|e| CommandError::invalid(format!("Invalid message ID: {e}")))?;
    Ok((count, before))
}

impl Commands {
    pub(super) async fn list_newsletters(&self) -> CommandResult {
        let newsletters = self
            .transport()
            .subscribed_newsletters()
            .await
            .map_err(|source| {
                CommandError::transport("get subscribed newsletters", None, source)
            })?;
        for newsletter in newsletters {
            tracing::info!("* {}: {}", newsletter.jid, newsletter.name);
        }
        Ok(())
    }

    pub(super) async fn get_newsletter(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        let info = self
            .transport()
            .newsletter_info(&jid)
            .await
            .map_err(|source| CommandError::transport("get info", Some(&jid), source))?;
        tracing::info!("Got info: {info}");
        Ok(())
    }

    pub(super) async fn get_newsletter_invite(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let info = self
            .transport()
            .newsletter_info_with_invite(&args[0])
            .await
            .map_err(|source| CommandError::transport("get info", None, source))?;
        tracing::info!("Got info: {info}");
        Ok(())
    }

    pub(super) async fn live_subscribe_newsletter(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        let duration = self
            .transport()
            .newsletter_subscribe_live(&jid)
            .await
            .map_err(|source| {
                CommandError::transport("subscribe to live updates", Some(&jid), source)
            })?;
        tracing::info!("Subscribed to live updates for {jid} for {duration:?}");
        Ok(())
    }

    pub(super) async fn get_newsletter_messages(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        let (count, before) = message_window(&args[1..])?;
        let messages = self
            .transport()
            .newsletter_messages(&jid, count, before)
            .await
            .map_err(|source| CommandError::transport("get messages", Some(&jid), source))?;
        match messages.as_array() {
            Some(items) => {
                for item in items {
                    tracing::info!("{item}");
                }
            }
            None => tracing::info!("{messages}"),
        }
        Ok(())
    }

    pub(super) async fn create_newsletter(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let created = self
            .transport()
            .create_newsletter(&args.join(" "))
            .await
            .map_err(|source| CommandError::transport("create newsletter", None, source))?;
        tracing::info!("Created newsletter {created}");
        Ok(())
    }
}
