//! Thumbnail pipeline: persistent cache store, generator state machine and the
//! viewport-driven loader.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::convert::{ResizeMode, ThumbnailFormat};
use crate::fs::{FileFingerprint, VirtualFile};
use crate::nested_path::NestedPath;

pub mod generator;
pub mod loader;
pub mod store;

pub use generator::ThumbnailGenerator;
pub use loader::{ItemUpdateSink, LoaderSettings, ThumbnailLoader, ViewportItem};
pub use store::ThumbnailStore;

/// Request parameters for a single thumbnail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThumbnailGetOptions {
    pub width: u32,
    pub height: u32,
    pub format: ThumbnailFormat,
    pub resize_policy: ResizeMode,
    /// A cached entry younger than this is served even when the source
    /// fingerprint no longer matches, to avoid regeneration storms while a
    /// file is being written.
    pub min_refresh_interval_ms: u64,
    /// Upper bound on preview frames collected from an archive interior.
    pub max_image_count: usize,
}

impl Default for ThumbnailGetOptions {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            format: ThumbnailFormat::Png,
            resize_policy: ResizeMode::Pad,
            min_refresh_interval_ms: 5_000,
            max_image_count: 4,
        }
    }
}

impl ThumbnailGetOptions {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(crate::error::Error::UnsupportedFormat(
                "thumbnail dimensions must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThumbnailStatus {
    /// Not yet attempted (or cache-only probe before any attempt).
    Unknown,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ThumbnailResult {
    pub status: ThumbnailStatus,
    /// Encoded frames. Regular images produce one; archives produce up to
    /// `max_image_count`, in logical-path order.
    pub frames: Vec<Vec<u8>>,
}

impl ThumbnailResult {
    pub fn failed() -> Self {
        Self {
            status: ThumbnailStatus::Failed,
            frames: Vec::new(),
        }
    }

    pub fn succeeded(frames: Vec<Vec<u8>>) -> Self {
        Self {
            status: ThumbnailStatus::Succeeded,
            frames,
        }
    }
}

/// Full identity of a cache entry. Two requests share an entry only when all
/// five fields match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailCacheId {
    pub path: NestedPath,
    pub width: u32,
    pub height: u32,
    pub resize_policy: ResizeMode,
    pub format: ThumbnailFormat,
}

impl ThumbnailCacheId {
    pub fn new(path: NestedPath, options: &ThumbnailGetOptions) -> Self {
        Self {
            path,
            width: options.width,
            height: options.height,
            resize_policy: options.resize_policy,
            format: options.format,
        }
    }

    /// Store key. Field order is fixed by the struct, so the encoding is
    /// deterministic.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A stored entry as read back from the cache.
#[derive(Debug, Clone)]
pub struct ThumbnailCacheEntry {
    pub fingerprint: FileFingerprint,
    pub created_at_ms: i64,
    pub frames: Vec<Vec<u8>>,
}

/// Anything able to answer thumbnail requests. The generator is the real
/// implementation; the loader only depends on this seam.
#[async_trait]
pub trait ThumbnailSource: Send + Sync {
    /// With `cache_only` set, never performs generation work: a usable cached
    /// entry yields `Succeeded`, anything else yields `Failed` immediately.
    async fn get_thumbnail(
        &self,
        file: Arc<dyn VirtualFile>,
        options: &ThumbnailGetOptions,
        cache_only: bool,
    ) -> ThumbnailResult;
}
