//! Durable storage for rendered diagrams and animations.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{imageops, Delay, Frame, Rgba, RgbaImage};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("an animation needs at least one frame")]
    NoFrames,
    #[error("invalid asset location {0:?}")]
    InvalidLocation(String),
    #[error("encoder task failed: {0}")]
    Task(String),
}

/// Where finished artifacts go. Locations are relative, `/`-separated
/// paths that [`public_url`] turns into URLs.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn store_image(&self, png: &[u8]) -> Result<String, AssetError>;
    /// Compose `frames` (in order) into one looping animation.
    async fn store_animation(&self, frames: &[Vec<u8>], frame_ms: u32)
        -> Result<String, AssetError>;
    async fn delete(&self, location: &str) -> Result<(), AssetError>;
}

/// Join a stored location onto the public base URL. No I/O.
pub fn public_url(base: &str, location: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        location.trim_start_matches('/')
    )
}

/// `<dir>/<YYYY>/<MM>/<uuid>.<ext>`
fn partitioned(dir: &str, ext: &str, at: DateTime<Utc>) -> String {
    format!(
        "{dir}/{:04}/{:02}/{}.{ext}",
        at.year(),
        at.month(),
        Uuid::new_v4()
    )
}

/// Files under a local directory, grouped by kind and month.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, AssetError> {
        let rel = Path::new(location);
        let safe = !location.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AssetError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(rel))
    }

    async fn write(&self, location: &str, bytes: &[u8]) -> Result<(), AssetError> {
        let path = self.resolve(location)?;
        let dir = path
            .parent()
            .ok_or_else(|| AssetError::InvalidLocation(location.to_string()))?;
        fs::create_dir_all(dir).await?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(%location, bytes = bytes.len(), "asset written");
        Ok(())
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn store_image(&self, png: &[u8]) -> Result<String, AssetError> {
        let location = partitioned("diagrams", "png", Utc::now());
        self.write(&location, png).await?;
        info!(%location, "diagram stored");
        Ok(location)
    }

    async fn store_animation(
        &self,
        frames: &[Vec<u8>],
        frame_ms: u32,
    ) -> Result<String, AssetError> {
        let owned = frames.to_vec();
        let gif = tokio::task::spawn_blocking(move || compose_gif(&owned, frame_ms))
            .await
            .map_err(|e| AssetError::Task(e.to_string()))??;
        let location = partitioned("animations", "gif", Utc::now());
        self.write(&location, &gif).await?;
        info!(%location, frames = frames.len(), "animation stored");
        Ok(location)
    }

    async fn delete(&self, location: &str) -> Result<(), AssetError> {
        match fs::remove_file(self.resolve(location)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Decode each frame and encode a looping GIF with a uniform delay.
///
/// Frames of different sizes are centred on a white canvas as large as the
/// largest frame, so the animation does not jump around.
pub fn compose_gif(frames: &[Vec<u8>], frame_ms: u32) -> Result<Vec<u8>, AssetError> {
    if frames.is_empty() {
        return Err(AssetError::NoFrames);
    }
    let decoded = frames
        .iter()
        .map(|bytes| image::load_from_memory(bytes).map(|img| img.to_rgba8()))
        .collect::<Result<Vec<RgbaImage>, _>>()?;

    let width = decoded.iter().map(|f| f.width()).max().unwrap_or(1);
    let height = decoded.iter().map(|f| f.height()).max().unwrap_or(1);
    let delay = Delay::from_numer_denom_ms(frame_ms, 1);

    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        encoder.set_repeat(Repeat::Infinite)?;
        for frame in decoded {
            let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
            let x = i64::from((width - frame.width()) / 2);
            let y = i64::from((height - frame.height()) / 2);
            imageops::overlay(&mut canvas, &frame, x, y);
            encoder.encode_frame(Frame::from_parts(canvas, 0, 0, delay))?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, ImageFormat};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 0, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn url_join_is_pure_concatenation() {
        assert_eq!(
            public_url("https://cdn.example.com/assets/", "/diagrams/2026/10/a.png"),
            "https://cdn.example.com/assets/diagrams/2026/10/a.png"
        );
        assert_eq!(public_url("http://h", "x.gif"), "http://h/x.gif");
    }

    #[test]
    fn locations_are_month_partitioned() {
        let at = DateTime::parse_from_rfc3339("2026-03-09T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let loc = partitioned("diagrams", "png", at);
        assert!(loc.starts_with("diagrams/2026/03/"));
        assert!(loc.ends_with(".png"));
        assert_ne!(loc, partitioned("diagrams", "png", at));
    }

    #[test]
    fn gif_keeps_frame_order_and_loops() {
        let frames = vec![png(4, 4, 40), png(6, 2, 120), png(2, 6, 220)];
        let gif = compose_gif(&frames, 250).unwrap();
        let decoder = GifDecoder::new(Cursor::new(gif)).unwrap();
        let decoded: Vec<Frame> = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(decoded.len(), 3);
        for frame in &decoded {
            assert_eq!(frame.buffer().dimensions(), (6, 6));
            assert_eq!(frame.delay().numer_denom_ms(), (250, 1));
        }
        // Centre pixels carry each source frame's shade, in order.
        let shades: Vec<u8> = decoded
            .iter()
            .map(|f| f.buffer().get_pixel(3, 3).0[0])
            .collect();
        assert!(shades[0] < shades[1] && shades[1] < shades[2]);
    }

    #[test]
    fn empty_or_garbage_frames_fail() {
        assert!(matches!(compose_gif(&[], 100), Err(AssetError::NoFrames)));
        assert!(matches!(
            compose_gif(&[b"not an image".to_vec()], 100),
            Err(AssetError::Image(_))
        ));
    }

    #[tokio::test]
    async fn store_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = LocalAssetStore::new(dir.path());

        let loc = store.store_image(&png(3, 3, 1)).await.unwrap();
        assert!(loc.starts_with("diagrams/"));
        assert!(dir.path().join(&loc).is_file());

        let anim = store
            .store_animation(&[png(3, 3, 1), png(3, 3, 2)], 1000)
            .await
            .unwrap();
        assert!(anim.starts_with("animations/") && anim.ends_with(".gif"));

        store.delete(&loc).await.unwrap();
        assert!(!dir.path().join(&loc).exists());
        store.delete(&loc).await.unwrap();
        assert!(matches!(
            store.delete("../escape.png").await,
            Err(AssetError::InvalidLocation(_))
        ));
    }
}
