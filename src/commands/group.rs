use super::{
    CommandError, CommandResult, Commands, parse_flag, parse_group_jid, parse_jid, require_args,
};
use crate::transport::traits::ParticipantAction;

impl Commands {
    pub(super) async fn get_group(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let group = parse_group_jid(&args[0])?;
        let info = self
            .transport()
            .group_info(&group)
            .await
            .map_err(|source| CommandError::transport("get group info", Some(&group), source))?;
        tracing::info!("Group info: {}", super::pretty(&info));
        Ok(())
    }

    pub(super) async fn subgroups(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let community = parse_group_jid(&args[0])?;
        let groups = self
            .transport()
            .subgroups(&community)
            .await
            .map_err(|source| CommandError::transport("get subgroups", Some(&community), source))?;
        tracing::info!("Subgroups: {groups}");
        Ok(())
    }

    pub(super) async fn community_participants(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let community = parse_group_jid(&args[0])?;
        let participants = self
            .transport()
            .community_participants(&community)
            .await
            .map_err(|source| {
                CommandError::transport("get community participants", Some(&community), source)
            })?;
        let list: Vec<String> = participants.iter().map(ToString::to_string).collect();
        tracing::info!("Community participants: {}", list.join(", "));
        Ok(())
    }

    pub(super) async fn get_invite_link(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let group = parse_group_jid(&args[0])?;
        let reset = match args.get(1) {
            Some(raw) => parse_flag(raw)
                .ok_or_else(|| CommandError::invalid(format!("invalid reset flag {raw:?}")))?,
            None => false,
        };
        let link = self
            .transport()
            .invite_link(&group, reset)
            .await
            .map_err(|source| CommandError::transport("get invite link", Some(&group), source))?;
        tracing::info!("Invite link: {link}");
        Ok(())
    }

    pub(super) async fn query_invite_link(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let info = self
            .transport()
            .query_invite_link(&args[0])
            .await
            .map_err(|source| CommandError::transport("query invite link", None, source))?;
        tracing::info!("Invite link info: {info}");
        Ok(())
    }

    pub(super) async fn join_invite_link(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let group = self
            .transport()
            .join_invite_link(&args[0])
            .await
            .map_err(|source| CommandError::transport("join invite link", None, source))?;
        tracing::info!("Joined group {group}");
        Ok(())
    }

    pub(super) async fn update_participant(&self, args: &[String]) -> CommandResult {
        require_args(args, 3)?;
        let group = parse_group_jid(&args[0])?;
        let participant = parse_jid(&args[1])?;
        let action = ParticipantAction::parse(&args[2]).ok_or_else(|| {
            CommandError::invalid(format!(
                "unknown participant action {:?}, expected add, remove, promote or demote",
                args[2]
            ))
        })?;
        let response = self
            .transport()
            .update_participant(&group, &participant, action)
            .await
            .map_err(|source| CommandError::transport("update participant", Some(&group), source))?;
        tracing::info!("Update participant response: {response}");
        Ok(())
    }

    pub(super) async fn get_request_participant(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let group = parse_group_jid(&args[0])?;
        let requests = self
            .transport()
            .group_join_requests(&group)
            .await
            .map_err(|source| {
                CommandError::transport("get request participant", Some(&group), source)
            })?;
        tracing::info!("Request participant: {requests}");
        Ok(())
    }
}
