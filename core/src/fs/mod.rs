//! Uniform node abstraction over physical and archive-backed locations.
//!
//! Exactly two implementations exist per trait: the local variant sources
//! bytes and metadata from the physical filesystem, the archived variant from
//! an `ArchiveExtractor`. The contract shape is identical; only sourcing
//! differs.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::Result;
use crate::nested_path::NestedPath;

pub mod archived;
pub mod local;

/// Attribute flags reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAttributes {
    Normal,
    /// The node is a file whose extension names a supported archive format;
    /// it can be converted into a directory view.
    Archive,
}

pub trait VirtualNode: Send + Sync {
    fn name(&self) -> String;

    /// Virtual address of this node, possibly crossing archive boundaries.
    fn logical_path(&self) -> &NestedPath;

    fn attributes(&self) -> NodeAttributes;

    fn exists(&self) -> bool;

    /// Byte length, where physically meaningful.
    fn length(&self) -> Option<u64>;

    fn last_write_time(&self) -> Option<SystemTime>;
}

pub trait VirtualDirectory: VirtualNode {
    fn find_directories(&self) -> Result<Vec<Arc<dyn VirtualDirectory>>>;

    fn find_files(&self) -> Result<Vec<Arc<dyn VirtualFile>>>;
}

pub trait VirtualFile: VirtualNode {
    /// Opens the file's bytes for reading.
    fn open_read(&self) -> Result<Box<dyn Read + Send>>;

    /// A physical path for this file, materializing it into a temp file when
    /// it lives inside an archive. The node owns any temp file it creates and
    /// deletes it when the node (and everything sharing the materialization)
    /// is dropped.
    fn get_physical_path(&self) -> Result<PathBuf>;

    /// Directory view over this file's contents when its extension names a
    /// supported archive format; `Ok(None)` otherwise. The extractor is
    /// created once per node and reused.
    fn try_convert_to_directory(self: Arc<Self>) -> Result<Option<Arc<dyn VirtualDirectory>>>;

    fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_read()?.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Change-detection fingerprint: length plus modification time, deliberately
/// not a content hash. A file rewritten with identical length within the same
/// clock tick goes undetected; that trade is accepted for speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub length: u64,
    pub mtime_ms: i64,
}

impl FileFingerprint {
    /// Fingerprint of a live file, or None when it does not exist.
    pub fn of(file: &dyn VirtualFile) -> Option<Self> {
        if !file.exists() {
            return None;
        }
        let length = file.length()?;
        let mtime_ms = file
            .last_write_time()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Some(Self { length, mtime_ms })
    }
}

/// Walks `rel` down from `root`, converting archive files into directories at
/// each boundary. `rel` segments are interior paths, one per archive level;
/// the final component names a file.
pub fn resolve_file(
    root: &Arc<dyn VirtualDirectory>,
    rel: &NestedPath,
) -> Result<Option<Arc<dyn VirtualFile>>> {
    let mut dir: Arc<dyn VirtualDirectory> = Arc::clone(root);
    let segments = rel.segments();
    for (i, segment) in segments.iter().enumerate() {
        let last_segment = i + 1 == segments.len();
        let mut components = segment.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            let last_component = last_segment && components.peek().is_none();
            if last_component {
                let file = dir
                    .find_files()?
                    .into_iter()
                    .find(|f| f.name() == component);
                return Ok(file);
            }
            // Mid-path component: a subdirectory, or an archive crossed into.
            if let Some(sub) = dir
                .find_directories()?
                .into_iter()
                .find(|d| d.name() == component)
            {
                dir = sub;
                continue;
            }
            let Some(file) = dir
                .find_files()?
                .into_iter()
                .find(|f| f.name() == component)
            else {
                return Ok(None);
            };
            let Some(converted) = file.try_convert_to_directory()? else {
                return Ok(None);
            };
            dir = converted;
        }
    }
    Ok(None)
}
