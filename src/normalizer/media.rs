//! Files written while normalizing: link thumbnails and downloaded media.

use super::NormalizeError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File extension for a mimetype, without the leading dot.
pub fn extension_for(mimetype: &str) -> String {
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let preferred = match essence.as_str() {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/ogg" => Some("ogg"),
        "audio/mpeg" => Some("mp3"),
        "audio/mp4" => Some("m4a"),
        "application/pdf" => Some("pdf"),
        _ => None,
    };
    if let Some(ext) = preferred {
        return ext.to_string();
    }
    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map_or_else(|| "bin".to_string(), |ext| (*ext).to_string())
}

/// Write `bytes` to `<workspace>/media/<dir>/<id>.<ext>`.
pub async fn write_media(
    workspace: &Path,
    dir: &str,
    message_id: &str,
    ext: &str,
    bytes: &[u8],
) -> Result<PathBuf, NormalizeError> {
    let folder = workspace.join("media").join(dir);
    let path = folder.join(format!("{message_id}.{ext}"));
    let written = async {
        tokio::fs::create_dir_all(&folder).await?;
        tokio::fs::write(&path, bytes).await
    };
    match written.await {
        Ok(()) => Ok(path),
        Err(source) => Err(NormalizeError::Io { path, source }),
    }
}

/// Remove `path` after `delay`, whatever happened to the record.
pub fn schedule_delete(path: PathBuf, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Deleted {}", path.display()),
            Err(e) => tracing::warn!("Failed to delete {}: {e}", path.display()),
        }
    });
}
