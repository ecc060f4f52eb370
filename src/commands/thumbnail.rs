//! JPEG preview thumbnails for outgoing images and videos.

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Longest side of a thumbnail, in pixels.
pub const MAX_SIDE: u32 = 100;

/// Grab the first frame of a media file with `ffmpeg` and shrink it.
///
/// Works for still images too, since ffmpeg decodes them as one-frame video.
pub async fn create(path: &Path) -> anyhow::Result<Vec<u8>> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(path)
        .args(["-vframes", "1", "-q:v", "2", "-f", "mjpeg", "pipe:1"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .context("Failed to run ffmpeg")?;
    if !output.status.success() {
        anyhow::bail!("ffmpeg exited with {}", output.status);
    }
    shrink_to_jpeg(&output.stdout)
}

/// Decode, fit within [`MAX_SIDE`] keeping the aspect ratio, re-encode as JPEG.
/// Images already small enough keep their size.
pub fn shrink_to_jpeg(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).context("Failed to decode frame")?;
    let img = if img.width().max(img.height()) > MAX_SIDE {
        img.resize(MAX_SIDE, MAX_SIDE, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .context("Failed to encode thumbnail")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        image::RgbImage::new(width, height)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn dimensions(jpeg: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn wide_image_is_limited_by_width() {
        let thumb = shrink_to_jpeg(&png(400, 200)).unwrap();
        assert_eq!(dimensions(&thumb), (100, 50));
    }

    #[test]
    fn tall_image_is_limited_by_height() {
        let thumb = shrink_to_jpeg(&png(150, 300)).unwrap();
        assert_eq!(dimensions(&thumb), (50, 100));
    }

    #[test]
    fn small_image_keeps_size() {
        let thumb = shrink_to_jpeg(&png(40, 30)).unwrap();
        assert_eq!(dimensions(&thumb), (40, 30));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(shrink_to_jpeg(b"definitely not pixels").is_err());
    }
}
