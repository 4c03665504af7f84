//! Thumbnail generation with a cache fast path.
//!
//! Request flow: cache lookup, fingerprint comparison, then (unless the
//! caller asked for cache-only) decode/resize on the blocking pool and a
//! transactional cache write. Failures always degrade to a `Failed` result;
//! callers never see errors, only statuses.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{
    ThumbnailCacheId, ThumbnailGetOptions, ThumbnailResult, ThumbnailSource, ThumbnailStore,
};
use crate::config::GeneratorConfig;
use crate::convert::{is_supported_image_ext, ImageConverter, ResizeSpec};
use crate::error::{Error, Result};
use crate::fs::{FileFingerprint, NodeAttributes, VirtualDirectory, VirtualFile};

pub struct ThumbnailGenerator {
    store: Arc<ThumbnailStore>,
    converter: ImageConverter,
}

impl ThumbnailGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let store = ThumbnailStore::open(
            &config.data_dir.join("thumbnails.db"),
            config.passphrase.as_deref(),
        )?;
        Ok(Self {
            store: Arc::new(store),
            converter: ImageConverter::new(),
        })
    }

    async fn get_inner(
        &self,
        file: Arc<dyn VirtualFile>,
        options: &ThumbnailGetOptions,
        cache_only: bool,
    ) -> Result<ThumbnailResult> {
        options.validate()?;
        let Some(fingerprint) = FileFingerprint::of(file.as_ref()) else {
            return Ok(ThumbnailResult::failed());
        };
        let key = ThumbnailCacheId::new(file.logical_path().clone(), options).encode();

        if let Some(entry) = self.store.find_one(&key)? {
            if entry.fingerprint == fingerprint {
                return Ok(ThumbnailResult::succeeded(entry.frames));
            }
            // Source changed. A very fresh entry is still served to ride out
            // files that are mid-write; the next request past the interval
            // regenerates.
            if !cache_only
                && now_ms().saturating_sub(entry.created_at_ms)
                    < options.min_refresh_interval_ms as i64
            {
                return Ok(ThumbnailResult::succeeded(entry.frames));
            }
        }
        if cache_only {
            return Ok(ThumbnailResult::failed());
        }

        let store = Arc::clone(&self.store);
        let converter = self.converter.clone();
        let options = options.clone();
        let frames = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<u8>>> {
            let frames = generate_frames(&converter, file, &options)?;
            store.insert(&key, fingerprint, &frames)?;
            Ok(frames)
        })
        .await
        .map_err(|_| Error::Canceled)??;

        Ok(ThumbnailResult::succeeded(frames))
    }
}

#[async_trait]
impl ThumbnailSource for ThumbnailGenerator {
    async fn get_thumbnail(
        &self,
        file: Arc<dyn VirtualFile>,
        options: &ThumbnailGetOptions,
        cache_only: bool,
    ) -> ThumbnailResult {
        let path = file.logical_path().clone();
        match self.get_inner(file, options, cache_only).await {
            Ok(result) => result,
            Err(Error::Canceled) => {
                log::debug!("thumbnail request for {} canceled", path);
                ThumbnailResult::failed()
            }
            Err(e) => {
                log::debug!("thumbnail generation for {} failed: {}", path, e);
                ThumbnailResult::failed()
            }
        }
    }
}

/// Encoded frames for `file`. Regular files decode as a single frame;
/// archives contribute up to `max_image_count` interior images, walked
/// breadth-first in listing order.
fn generate_frames(
    converter: &ImageConverter,
    file: Arc<dyn VirtualFile>,
    options: &ThumbnailGetOptions,
) -> Result<Vec<Vec<u8>>> {
    let resize = ResizeSpec {
        width: options.width,
        height: options.height,
        mode: options.resize_policy,
    };
    if file.attributes() != NodeAttributes::Archive {
        let bytes = file.read_bytes()?;
        return Ok(vec![converter.convert(&bytes, options.format, Some(resize))?]);
    }

    let Some(root) = Arc::clone(&file).try_convert_to_directory()? else {
        let bytes = file.read_bytes()?;
        return Ok(vec![converter.convert(&bytes, options.format, Some(resize))?]);
    };
    let mut frames = Vec::new();
    let mut queue: VecDeque<Arc<dyn VirtualDirectory>> = VecDeque::from([root]);
    while let Some(dir) = queue.pop_front() {
        if frames.len() >= options.max_image_count {
            break;
        }
        for candidate in dir.find_files()? {
            if frames.len() >= options.max_image_count {
                break;
            }
            let is_image = candidate
                .logical_path()
                .extension()
                .map(|e| is_supported_image_ext(&e))
                .unwrap_or(false);
            if !is_image {
                continue;
            }
            let bytes = candidate.read_bytes()?;
            match converter.convert(&bytes, options.format, Some(resize)) {
                Ok(frame) => frames.push(frame),
                // One broken interior image does not spoil the archive.
                Err(e) => log::debug!(
                    "skipping undecodable {}: {}",
                    candidate.logical_path(),
                    e
                ),
            }
        }
        queue.extend(dir.find_directories()?);
    }
    if frames.is_empty() {
        return Err(Error::UnsupportedFormat("archive holds no preview frames".into()));
    }
    Ok(frames)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
