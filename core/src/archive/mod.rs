//! Archive access behind a single trait, dispatched by file extension.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, Result};

pub mod zip;

/// Extensions the extractor registry can open, lowercase, without dot.
const SUPPORTED_EXTENSIONS: &[&str] = &["zip"];

/// Pure extension check used to decide whether a file can be treated as a
/// directory at all; never touches the file contents.
pub fn is_supported_extension(ext: &str) -> bool {
    let e = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&e.as_str())
}

/// One entry of an archive listing: the immediate child name under the
/// requested prefix plus the entry's full interior path and metadata.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub inner_path: String,
    pub size: u64,
    pub last_write_time: Option<SystemTime>,
}

/// Read access to one opened archive file.
///
/// Archives store flat entry names, so the directory tree handed out by
/// `list_directories`/`list_files` is synthesized from name prefixes.
pub trait ArchiveExtractor: Send + Sync {
    /// The physical file this extractor reads from.
    fn archive_path(&self) -> &Path;

    /// Immediate subdirectory names under `inner_prefix` ("" for the root).
    fn list_directories(&self, inner_prefix: &str) -> Result<Vec<String>>;

    /// Immediate file entries under `inner_prefix`.
    fn list_files(&self, inner_prefix: &str) -> Result<Vec<ArchiveEntry>>;

    /// Copies one entry into `dest`, returning the number of bytes written.
    fn extract_file(&self, inner_path: &str, dest: &mut dyn Write) -> Result<u64>;

    /// Entry size without extraction.
    fn file_size(&self, inner_path: &str) -> Result<u64>;

    /// Entry modification time without extraction.
    fn file_last_write_time(&self, inner_path: &str) -> Result<Option<SystemTime>>;

    /// Fully reads one entry into memory.
    fn read_file(&self, inner_path: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.extract_file(inner_path, &mut buf)?;
        Ok(buf)
    }
}

/// Opens `path` with the extractor matching its extension.
pub fn open(path: &Path) -> Result<Arc<dyn ArchiveExtractor>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "zip" => Ok(Arc::new(zip::ZipExtractor::open(path)?)),
        other => Err(Error::UnsupportedFormat(format!(
            "no extractor registered for extension '{}'",
            other
        ))),
    }
}
