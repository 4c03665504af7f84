//! nestview core: virtual paths across nested archives, archive-backed
//! directory views, and the thumbnail cache/generation/loading pipeline
//! behind the file grid.

pub mod archive;
pub mod config;
pub mod convert;
pub mod debounce;
pub mod error;
pub mod fs;
pub mod nested_path;
pub mod thumbnail;

pub use config::GeneratorConfig;
pub use convert::{ImageConverter, ResizeMode, ResizeSpec, ThumbnailFormat};
pub use error::{Error, Result};
pub use fs::{
    FileFingerprint, NodeAttributes, VirtualDirectory, VirtualFile, VirtualNode,
};
pub use nested_path::NestedPath;
pub use thumbnail::{
    ItemUpdateSink, LoaderSettings, ThumbnailGenerator, ThumbnailGetOptions, ThumbnailLoader,
    ThumbnailResult, ThumbnailSource, ThumbnailStatus, ThumbnailStore, ViewportItem,
};
