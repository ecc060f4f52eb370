use super::{CommandError, CommandResult, Commands, parse_jid, require_args};
use crate::transport::events::BlocklistAction;
use crate::transport::traits::AppStatePatch;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Disappearing-message timer given in whole days.
pub(crate) fn parse_days(raw: &str) -> CommandResult<(u32, Duration)> {
    let days: u32 = raw
        .parse()
        .map_err(|e| CommandError::invalid(format!("Invalid duration: {e}")))?;
    Ok((days, DAY * days))
}

impl Commands {
    pub(super) async fn pair_phone(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        if self.session.is_logged_in() {
            tracing::info!("Already logged in");
            return Ok(());
        }
        let phone = args[0].trim_start_matches('+');
        let code = self
            .transport()
            .pair_phone(phone)
            .await
            .map_err(|source| CommandError::transport("pair phone", None, source))?;
        tracing::info!("Pair code: {code}");
        tracing::info!("Link your phone by entering this code in WhatsApp > Linked Devices");
        Ok(())
    }

    pub(super) async fn logout(&self) -> CommandResult {
        self.session
            .logout()
            .await
            .map_err(|source| CommandError::transport("log out", None, source))?;
        tracing::info!("Successfully logged out");
        Ok(())
    }

    pub(super) async fn set_push_name(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let name = args.join(" ");
        self.transport()
            .send_app_state(AppStatePatch::PushName(name))
            .await
            .map_err(|source| CommandError::transport("set push name", None, source))?;
        tracing::info!("Push name updated");
        Ok(())
    }

    pub(super) async fn set_status(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        self.transport()
            .set_status_message(&args.join(" "))
            .await
            .map_err(|source| CommandError::transport("set status message", None, source))?;
        tracing::info!("Status updated");
        Ok(())
    }

    pub(super) async fn privacy_settings(&self) -> CommandResult {
        let settings = self
            .transport()
            .privacy_settings()
            .await
            .map_err(|source| CommandError::transport("fetch privacy settings", None, source))?;
        tracing::info!("Privacy settings: {settings}");
        Ok(())
    }

    pub(super) async fn set_privacy_setting(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let settings = self
            .transport()
            .set_privacy_setting(&args[0], &args[1])
            .await
            .map_err(|source| CommandError::transport("set privacy setting", None, source))?;
        tracing::info!("Privacy setting updated: {settings}");
        Ok(())
    }

    pub(super) async fn status_privacy(&self) -> CommandResult {
        let privacy = self
            .transport()
            .status_privacy()
            .await
            .map_err(|source| CommandError::transport("get status privacy", None, source))?;
        tracing::info!("Status privacy: {privacy}");
        Ok(())
    }

    pub(super) async fn set_disappear_timer(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let (days, timer) = parse_days(&args[1])?;
        let chat = parse_jid(&args[0])?;
        self.transport()
            .set_disappearing_timer(&chat, timer)
            .await
            .map_err(|source| {
                CommandError::transport("set disappearing timer", Some(&chat), source)
            })?;
        tracing::info!("Disappearing timer set for {chat} to {days} days");
        Ok(())
    }

    pub(super) async fn set_default_disappear_timer(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let (days, timer) = parse_days(&args[0])?;
        self.transport()
            .set_default_disappearing_timer(timer)
            .await
            .map_err(|source| {
                CommandError::transport("set default disappearing timer", None, source)
            })?;
        tracing::info!("Default disappearing timer set to {days} days");
        Ok(())
    }

    pub(super) async fn get_blocklist(&self) -> CommandResult {
        let blocklist = self
            .transport()
            .blocklist()
            .await
            .map_err(|source| CommandError::transport("get blocked contacts list", None, source))?;
        tracing::info!("Blocklist: {blocklist}");
        Ok(())
    }

    pub(super) async fn update_blocklist(&self, args: &[String], block: bool) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        let action = if block {
            BlocklistAction::Block
        } else {
            BlocklistAction::Unblock
        };
        let response = self
            .transport()
            .update_blocklist(&jid, action)
            .await
            .map_err(|source| CommandError::transport("update blocklist", Some(&jid), source))?;
        let verb = if block { "Blocked" } else { "Unblocked" };
        tracing::info!("{verb} {jid}: {response}");
        Ok(())
    }
}
