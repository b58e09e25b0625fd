// SPDX-License-Identifier: GPL-3.0-only

//! Recording assets on disk
//!
//! Each recording attempt owns `<root>/<key>/` holding `<key>.mp4` and
//! `<key>_thumb.jpg`. Stream metadata is probed from the finished file the
//! first time it is asked for and cached on the asset.

use crate::constants::file_formats;
use crate::errors::{CoreError, CoreResult};
use crate::media::inspect::{MediaInfo, MediaInspector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One recording attempt
#[derive(Debug, Clone, PartialEq)]
pub struct VideoAsset {
    key: String,
    directory: PathBuf,
    video_path: PathBuf,
    thumbnail_path: PathBuf,
    metadata: Option<MediaInfo>,
}

impl VideoAsset {
    fn new(root: &Path, key: &str) -> Self {
        let directory = root.join(key);
        let video_path = directory.join(format!("{}.{}", key, file_formats::VIDEO_EXTENSION));
        let thumbnail_path = directory.join(format!(
            "{}{}.{}",
            key,
            file_formats::THUMBNAIL_SUFFIX,
            file_formats::THUMBNAIL_EXTENSION
        ));
        Self {
            key: key.to_string(),
            directory,
            video_path,
            thumbnail_path,
            metadata: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn thumbnail_path(&self) -> &Path {
        &self.thumbnail_path
    }

    /// Cached stream properties, `None` until probed
    pub fn metadata(&self) -> Option<MediaInfo> {
        self.metadata
    }

    pub fn width(&self) -> u32 {
        self.metadata.map(|m| m.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.metadata.map(|m| m.height).unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.metadata.map(|m| m.duration_ms).unwrap_or(0)
    }
}

/// Creates, probes, thumbnails and deletes [`VideoAsset`]s under one root
#[derive(Clone)]
pub struct AssetManager {
    root: PathBuf,
    inspector: Arc<dyn MediaInspector>,
}

impl AssetManager {
    pub fn new(root: impl Into<PathBuf>, inspector: Arc<dyn MediaInspector>) -> Self {
        Self {
            root: root.into(),
            inspector,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Prepare an empty `<root>/<key>/`, wiping any earlier attempt
    pub fn create_output_location(&self, key: &str) -> CoreResult<VideoAsset> {
        if key.is_empty() || key.contains(std::path::MAIN_SEPARATOR) || key == "." || key == ".." {
            return Err(CoreError::StorageUnavailable(format!(
                "Invalid recording key {:?}",
                key
            )));
        }

        let asset = VideoAsset::new(&self.root, key);
        if asset.directory.exists() {
            debug!(dir = %asset.directory.display(), "Removing previous recording directory");
            std::fs::remove_dir_all(&asset.directory).map_err(|e| {
                CoreError::StorageUnavailable(format!(
                    "Failed to clear {}: {}",
                    asset.directory.display(),
                    e
                ))
            })?;
        }
        std::fs::create_dir_all(&asset.directory).map_err(|e| {
            CoreError::StorageUnavailable(format!(
                "Failed to create {}: {}",
                asset.directory.display(),
                e
            ))
        })?;

        info!(dir = %asset.directory.display(), "Recording directory ready");
        Ok(asset)
    }

    /// Width, height and duration of the finished file
    ///
    /// Cached after the first successful probe. A missing or unreadable
    /// file yields zeros and leaves the cache empty.
    pub fn probe(&self, asset: &mut VideoAsset) -> MediaInfo {
        if let Some(cached) = asset.metadata {
            return cached;
        }
        if !asset.video_path.is_file() {
            debug!(path = %asset.video_path.display(), "Nothing to probe yet");
            return MediaInfo::default();
        }

        match self.inspector.probe(&asset.video_path) {
            Ok(info) if !info.is_empty() => {
                asset.metadata = Some(info);
                info
            }
            Ok(_) => {
                warn!(path = %asset.video_path.display(), "Recording has no video stream");
                MediaInfo::default()
            }
            Err(e) => {
                warn!(path = %asset.video_path.display(), error = %e, "Failed to probe recording");
                MediaInfo::default()
            }
        }
    }

    /// Delete the asset's directory and forget its metadata; idempotent
    pub fn discard(&self, asset: &mut VideoAsset) -> CoreResult<()> {
        asset.metadata = None;
        match std::fs::remove_dir_all(&asset.directory) {
            Ok(()) => {
                info!(dir = %asset.directory.display(), "Recording discarded");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::StorageUnavailable(format!(
                "Failed to delete {}: {}",
                asset.directory.display(),
                e
            ))),
        }
    }

    /// JPEG of a frame near the start; an existing thumbnail is reused
    pub fn generate_thumbnail(&self, asset: &VideoAsset) -> CoreResult<PathBuf> {
        if asset.thumbnail_path.is_file() {
            debug!(path = %asset.thumbnail_path.display(), "Reusing thumbnail");
            return Ok(asset.thumbnail_path.clone());
        }

        let frame = self
            .inspector
            .extract_frame(&asset.video_path, Duration::ZERO)?;
        let rgb = image::DynamicImage::ImageRgba8(frame).into_rgb8();

        let mut buffer = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
            &mut buffer,
            file_formats::THUMBNAIL_JPEG_QUALITY,
        );
        encoder
            .encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| CoreError::StorageUnavailable(format!("JPEG encoding failed: {}", e)))?;

        std::fs::write(&asset.thumbnail_path, &buffer)?;
        info!(
            path = %asset.thumbnail_path.display(),
            width = rgb.width(),
            height = rgb.height(),
            "Thumbnail written"
        );
        Ok(asset.thumbnail_path.clone())
    }
}
