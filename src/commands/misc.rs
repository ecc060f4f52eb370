use super::{CommandError, CommandResult, Commands, parse_flag, parse_jid, pretty, require_args};
use crate::transport::message::{GroupInfo, OutgoingMessage};
use crate::transport::traits::{AppStatePatch, ChatPresence, Presence};
use serde_json::{Value, json};
use std::time::Duration;

const DEFAULT_MUTE: Duration = Duration::from_secs(8 * 60 * 60);

/// `appstate [resync] <names...>`: the `resync` keyword may appear anywhere.
pub(crate) fn app_state_request(args: &[String]) -> CommandResult<(bool, Vec<String>)> {
    require_args(args, 1)?;
    let resync = args.iter().any(|arg| arg == "resync");
    let names: Vec<String> = args.iter().filter(|arg| *arg != "resync").cloned().collect();
    if names.is_empty() {
        return Err(CommandError::invalid("No patch names provided."));
    }
    Ok((resync, names))
}

pub(crate) fn decode_key_ids(args: &[String]) -> CommandResult<Vec<Vec<u8>>> {
    require_args(args, 1)?;
    args.iter()
        .map(|id| {
            hex::decode(id)
                .map_err(|e| CommandError::invalid(format!("Failed to decode {id} as hex: {e}")))
        })
        .collect()
}

/// Mute length: absent means eight hours, zero means until unmuted.
pub(crate) fn mute_duration(raw: Option<&String>) -> CommandResult<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(Some(DEFAULT_MUTE));
    };
    let hours: u64 = raw
        .parse()
        .map_err(|e| CommandError::invalid(format!("Invalid duration: {e}")))?;
    Ok((hours > 0).then(|| Duration::from_secs(hours * 60 * 60)))
}

fn flag_arg(args: &[String], index: usize, position: &str) -> CommandResult<bool> {
    parse_flag(&args[index]).ok_or_else(|| {
        CommandError::invalid(format!("Invalid {position} argument: {:?}", args[index]))
    })
}

/// `listusers` output: every contact address plus the raw contact map.
pub(crate) fn users_document(contacts: Value) -> Value {
    let jids: Vec<String> = contacts
        .as_object()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();
    json!({ "jids": jids, "users": contacts })
}

pub(crate) fn groups_document(groups: &[GroupInfo]) -> Value {
    json!({ "groups": groups })
}

impl Commands {
    pub(super) async fn reconnect(&self) -> CommandResult {
        self.session
            .reconnect()
            .await
            .map_err(|source| CommandError::transport("reconnect", None, source))
    }

    pub(super) async fn app_state(&self, args: &[String]) -> CommandResult {
        let (resync, names) = app_state_request(args)?;
        for name in names {
            if let Err(source) = self.transport().fetch_app_state(&name, resync).await {
                let e = CommandError::transport(format!("fetch app state {name}"), None, source);
                tracing::error!(command = "appstate", "{e}");
            }
        }
        Ok(())
    }

    pub(super) async fn request_app_state_key(&self, args: &[String]) -> CommandResult {
        let key_ids = decode_key_ids(args)?;
        self.transport()
            .request_app_state_keys(key_ids)
            .await
            .map_err(|source| CommandError::transport("request app state keys", None, source))
    }

    /// Ask our primary device to resend a message this device could not decrypt.
    pub(super) async fn unavailable_request(&self, args: &[String]) -> CommandResult {
        require_args(args, 3)?;
        let chat = parse_jid(&args[0])?;
        let sender = parse_jid(&args[1])?;
        let own = self
            .session
            .default_jid()
            .ok_or_else(|| CommandError::invalid("Own JID is not known yet"))?;
        let request = OutgoingMessage::UnavailableRequest {
            chat,
            sender,
            message_id: args[2].clone(),
        };
        self.deliver(&own, request).await.map(drop)
    }

    pub(super) async fn check_user(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let results = self
            .transport()
            .is_on_whatsapp(args.to_vec())
            .await
            .map_err(|source| {
                CommandError::transport("check if users are on WhatsApp", None, source)
            })?;
        for item in results {
            let jid = item.jid.map(|j| j.to_string()).unwrap_or_default();
            match item.business_name {
                Some(business) => tracing::info!(
                    "{}: on WhatsApp: {}, JID: {jid}, business name: {business}",
                    item.query,
                    item.is_in
                ),
                None => tracing::info!("{}: on WhatsApp: {}, JID: {jid}", item.query, item.is_in),
            }
        }
        Ok(())
    }

    pub(super) async fn subscribe_presence(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        self.transport()
            .subscribe_presence(&jid)
            .await
            .map_err(|source| CommandError::transport("subscribe to presence", Some(&jid), source))?;
        tracing::info!("Subscribed to presence updates for {jid}");
        Ok(())
    }

    pub(super) async fn presence(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let presence = Presence::parse(&args[0])
            .ok_or_else(|| CommandError::invalid(format!("Unknown presence {:?}", args[0])))?;
        self.transport()
            .send_presence(presence)
            .await
            .map_err(|source| CommandError::transport("send presence", None, source))?;
        tracing::info!("Presence set to {}", args[0]);
        Ok(())
    }

    pub(super) async fn chat_presence(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let jid = parse_jid(&args[0])?;
        let presence = ChatPresence::parse(&args[1])
            .ok_or_else(|| CommandError::invalid(format!("Unknown chat presence {:?}", args[1])))?;
        let audio = args.get(2).is_some_and(|media| media == "audio");
        self.transport()
            .send_chat_presence(&jid, presence, audio)
            .await
            .map_err(|source| CommandError::transport("send chat presence", Some(&jid), source))?;
        tracing::info!("Chat presence sent to {jid}");
        Ok(())
    }

    pub(super) async fn get_user(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jids = args
            .iter()
            .map(|raw| parse_jid(raw))
            .collect::<CommandResult<Vec<_>>>()?;
        let info = self
            .transport()
            .user_info(jids)
            .await
            .map_err(|source| CommandError::transport("get user info", None, source))?;
        match info.as_object() {
            Some(users) => {
                for (jid, user) in users {
                    tracing::info!("{jid}: {user}");
                }
            }
            None => tracing::info!("{info}"),
        }
        Ok(())
    }

    pub(super) async fn raw(&self, args: &[String]) -> CommandResult {
        let node: Value = serde_json::from_str(&args.join(" ")).map_err(|e| {
            CommandError::invalid(format!("Failed to parse args as JSON into XML node: {e}"))
        })?;
        self.transport()
            .send_raw_node(node)
            .await
            .map_err(|source| CommandError::transport("send node", None, source))?;
        tracing::info!("Node sent");
        Ok(())
    }

    pub(super) async fn query_business_link(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let info = self
            .transport()
            .resolve_business_link(&args[0])
            .await
            .map_err(|source| {
                CommandError::transport("resolve business message link", None, source)
            })?;
        tracing::info!("Business info: {info}");
        Ok(())
    }

    pub(super) async fn list_users(&self) -> CommandResult {
        let contacts = self
            .transport()
            .contacts()
            .await
            .map_err(|source| CommandError::transport("get user list", None, source))?;
        println!("{}", pretty(&users_document(contacts)));
        Ok(())
    }

    pub(super) async fn list_groups(&self) -> CommandResult {
        let groups = self
            .transport()
            .joined_groups()
            .await
            .map_err(|source| CommandError::transport("get group list", None, source))?;
        println!("{}", pretty(&groups_document(&groups)));
        Ok(())
    }

    pub(super) async fn archive(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let target = parse_jid(&args[0])?;
        let archive = flag_arg(args, 1, "second")?;
        self.app_state_patch(
            AppStatePatch::Archive {
                target: target.clone(),
                archive,
            },
            "change chat's archive state",
        )
        .await?;
        tracing::info!("Archive state changed for {target} to {archive}");
        Ok(())
    }

    pub(super) async fn mute(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let target = parse_jid(&args[0])?;
        let mute = flag_arg(args, 1, "second")?;
        let duration = mute_duration(args.get(2))?;
        self.app_state_patch(
            AppStatePatch::Mute {
                target: target.clone(),
                mute,
                duration,
            },
            "change chat's mute state",
        )
        .await?;
        match duration {
            Some(duration) => tracing::info!(
                "Mute state changed for {target} to {mute} for {}h",
                duration.as_secs() / 3600
            ),
            None => tracing::info!("Mute state changed for {target} to {mute} indefinitely"),
        }
        Ok(())
    }

    pub(super) async fn pin(&self, args: &[String]) -> CommandResult {
        require_args(args, 2)?;
        let target = parse_jid(&args[0])?;
        let pin = flag_arg(args, 1, "second")?;
        self.app_state_patch(
            AppStatePatch::Pin {
                target: target.clone(),
                pin,
            },
            "change chat's pin state",
        )
        .await?;
        tracing::info!("Pin state changed for {target} to {pin}");
        Ok(())
    }

    pub(super) async fn label_chat(&self, args: &[String]) -> CommandResult {
        require_args(args, 3)?;
        let target = parse_jid(&args[0])?;
        let labeled = flag_arg(args, 2, "third")?;
        let label_id = args[1].clone();
        self.app_state_patch(
            AppStatePatch::LabelChat {
                target: target.clone(),
                label_id: label_id.clone(),
                labeled,
            },
            "change chat's label state",
        )
        .await?;
        tracing::info!("Label state changed for chat {target}, label ID {label_id}, action {labeled}");
        Ok(())
    }

    pub(super) async fn label_message(&self, args: &[String]) -> CommandResult {
        require_args(args, 4)?;
        let target = parse_jid(&args[0])?;
        let labeled = flag_arg(args, 3, "fourth")?;
        let (label_id, message_id) = (args[1].clone(), args[2].clone());
        self.app_state_patch(
            AppStatePatch::LabelMessage {
                target: target.clone(),
                label_id: label_id.clone(),
                message_id: message_id.clone(),
                labeled,
            },
            "change message's label state",
        )
        .await?;
        tracing::info!(
            "Label state changed for message {message_id} in chat {target}, label ID {label_id}, action {labeled}"
        );
        Ok(())
    }

    pub(super) async fn edit_label(&self, args: &[String]) -> CommandResult {
        require_args(args, 4)?;
        let color: i32 = args[2]
            .parse()
            .map_err(|e| CommandError::invalid(format!("Invalid third argument: {e}")))?;
        let deleted = flag_arg(args, 3, "fourth")?;
        let (label_id, name) = (args[0].clone(), args[1].clone());
        self.app_state_patch(
            AppStatePatch::LabelEdit {
                label_id: label_id.clone(),
                name: name.clone(),
                color,
                deleted,
            },
            "edit label",
        )
        .await?;
        tracing::info!("Label edited: label ID {label_id}, name {name}, color {color}, action {deleted}");
        Ok(())
    }

    async fn app_state_patch(&self, patch: AppStatePatch, action: &str) -> CommandResult {
        self.transport()
            .send_app_state(patch)
            .await
            .map_err(|source| CommandError::transport(action, None, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jid::Jid;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn app_state_resync_keyword_is_positionless() {
        let (resync, names) = app_state_request(&argv(&["regular", "resync", "critical_block"])).unwrap();
        assert!(resync);
        assert_eq!(names, vec!["regular", "critical_block"]);

        let err = app_state_request(&argv(&["resync"])).unwrap_err();
        assert_eq!(err.to_string(), "No patch names provided.");
    }

    #[test]
    fn key_ids_must_be_hex() {
        assert_eq!(decode_key_ids(&argv(&["0aff"])).unwrap(), vec![vec![0x0a, 0xff]]);
        let err = decode_key_ids(&argv(&["0aff", "zz"])).unwrap_err();
        assert!(err.to_string().starts_with("Failed to decode zz as hex"));
    }

    #[test]
    fn mute_defaults_to_eight_hours_and_zero_is_forever() {
        assert_eq!(mute_duration(None).unwrap(), Some(DEFAULT_MUTE));
        assert_eq!(mute_duration(Some(&"0".to_string())).unwrap(), None);
        assert_eq!(
            mute_duration(Some(&"2".to_string())).unwrap(),
            Some(Duration::from_secs(7200))
        );
        assert!(mute_duration(Some(&"soon".to_string())).is_err());
    }

    #[test]
    fn users_document_lists_contact_addresses() {
        let doc = users_document(json!({ "111@s.whatsapp.net": { "PushName": "Ann" } }));
        assert_eq!(doc["jids"], json!(["111@s.whatsapp.net"]));
        assert_eq!(doc["users"]["111@s.whatsapp.net"]["PushName"], "Ann");
    }

    #[test]
    fn groups_document_wraps_group_list() {
        let groups = vec![GroupInfo {
            jid: Jid::new("42", "g.us"),
            name: "Team".into(),
            participants: Vec::new(),
        }];
        let doc = groups_document(&groups);
        assert_eq!(doc["groups"][0]["Name"], "Team");
        assert_eq!(doc["groups"][0]["JID"], "42@g.us");
    }
}
