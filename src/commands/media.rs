use super::{CommandError, CommandResult, Commands, parse_jid, require_args};
use crate::transport::traits::ProfilePictureParams;

/// `getavatar` flags may appear anywhere after the address.
pub(crate) fn avatar_params(rest: &[String]) -> ProfilePictureParams {
    let mut params = ProfilePictureParams::default();
    for arg in rest {
        match arg.as_str() {
            "--preview" => params.preview = true,
            "--community" => params.is_community = true,
            other if params.existing_id.is_none() => params.existing_id = Some(other.to_string()),
            _ => {}
        }
    }
    params
}

impl Commands {
    pub(super) async fn media_conn(&self) -> CommandResult {
        let conn = self
            .transport()
            .media_conn()
            .await
            .map_err(|source| CommandError::transport("get media connection", None, source))?;
        tracing::info!("Media connection: {conn}");
        Ok(())
    }

    pub(super) async fn get_avatar(&self, args: &[String]) -> CommandResult {
        require_args(args, 1)?;
        let jid = parse_jid(&args[0])?;
        let params = avatar_params(&args[1..]);
        let picture = self
            .transport()
            .profile_picture(&jid, params)
            .await
            .map_err(|source| CommandError::transport("get avatar", Some(&jid), source))?;
        match picture {
            Some(picture) => tracing::info!("Got avatar ID {}: {}", picture.id, picture.url),
            None => tracing::info!("No avatar found"),
        }
        Ok(())
    }
}
