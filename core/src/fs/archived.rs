//! Archive-backed variant of the virtual node traits.
//!
//! Zip-in-zip composes through materialization: asking an archived file for a
//! physical path extracts that single entry into a uniquely named temp file,
//! and converting it to a directory opens a fresh extractor over that temp
//! file. Every node that depends on a materialized file holds an
//! `Arc<TempFileGuard>` clone, so an outer node being dropped can never
//! delete a temp file still backing an inner extractor.

use std::fs;
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::{NodeAttributes, VirtualDirectory, VirtualFile, VirtualNode};
use crate::archive::{self, ArchiveExtractor};
use crate::error::Result;
use crate::nested_path::NestedPath;

/// Owns one temp file and deletes it on drop.
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                log::debug!("failed to delete temp file {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct ArchivedDirectory {
    extractor: Arc<dyn ArchiveExtractor>,
    /// Interior path prefix, "" at the archive root.
    inner_prefix: String,
    logical: NestedPath,
    /// Keeps the materialized archive file alive while any node of this
    /// subtree exists. None when the archive is an ordinary physical file.
    backing: Option<Arc<TempFileGuard>>,
}

impl ArchivedDirectory {
    /// Directory view over the root of an opened archive. `logical` is the
    /// archive file's path with an empty trailing segment appended, marking
    /// "inside the archive".
    pub fn archive_root(
        extractor: Arc<dyn ArchiveExtractor>,
        logical: NestedPath,
        backing: Option<Arc<TempFileGuard>>,
    ) -> Arc<dyn VirtualDirectory> {
        Arc::new(Self {
            extractor,
            inner_prefix: String::new(),
            logical,
            backing,
        })
    }

    fn child_prefix(&self, name: &str) -> String {
        if self.inner_prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.inner_prefix, name)
        }
    }
}

impl VirtualNode for ArchivedDirectory {
    fn name(&self) -> String {
        self.logical.name().to_string()
    }

    fn logical_path(&self) -> &NestedPath {
        &self.logical
    }

    fn attributes(&self) -> NodeAttributes {
        NodeAttributes::Normal
    }

    fn exists(&self) -> bool {
        true
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        None
    }
}

impl VirtualDirectory for ArchivedDirectory {
    fn find_directories(&self) -> Result<Vec<Arc<dyn VirtualDirectory>>> {
        let mut out: Vec<Arc<dyn VirtualDirectory>> = Vec::new();
        for name in self.extractor.list_directories(&self.inner_prefix)? {
            out.push(Arc::new(ArchivedDirectory {
                extractor: Arc::clone(&self.extractor),
                inner_prefix: self.child_prefix(&name),
                logical: self.logical.join(&name)?,
                backing: self.backing.clone(),
            }));
        }
        Ok(out)
    }

    fn find_files(&self) -> Result<Vec<Arc<dyn VirtualFile>>> {
        let mut out: Vec<Arc<dyn VirtualFile>> = Vec::new();
        for entry in self.extractor.list_files(&self.inner_prefix)? {
            out.push(Arc::new(ArchivedFile {
                extractor: Arc::clone(&self.extractor),
                inner_path: entry.inner_path,
                logical: self.logical.join(&entry.name)?,
                size: entry.size,
                mtime: entry.last_write_time,
                backing: self.backing.clone(),
                materialized: Mutex::new(None),
            }));
        }
        Ok(out)
    }
}

pub struct ArchivedFile {
    extractor: Arc<dyn ArchiveExtractor>,
    inner_path: String,
    logical: NestedPath,
    size: u64,
    mtime: Option<SystemTime>,
    backing: Option<Arc<TempFileGuard>>,
    /// Single-flight memoized materialization of this entry.
    materialized: Mutex<Option<Arc<TempFileGuard>>>,
}

impl ArchivedFile {
    /// Extracts this entry to a temp file once and reuses it afterwards. The
    /// lock makes concurrent callers wait for the first materialization
    /// instead of racing.
    fn materialize(&self) -> Result<Arc<TempFileGuard>> {
        let mut slot = match self.materialized.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        if let Some(guard) = slot.as_ref() {
            return Ok(Arc::clone(guard));
        }

        let dir = std::env::temp_dir().join("nestview");
        fs::create_dir_all(&dir)?;
        let ext = self
            .logical
            .extension()
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        // Random names with retry on collision rather than a counter.
        let mut last_err = None;
        for _ in 0..16 {
            let candidate = dir.join(format!("{}{}", uuid::Uuid::new_v4().simple(), ext));
            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let guard = Arc::new(TempFileGuard {
                path: candidate.clone(),
            });
            if let Err(e) = self.extractor.extract_file(&self.inner_path, &mut file) {
                // Guard drop removes the partial file.
                drop(file);
                drop(guard);
                return Err(e);
            }
            file.flush()?;
            *slot = Some(Arc::clone(&guard));
            return Ok(guard);
        }
        Err(last_err
            .unwrap_or_else(|| ErrorKind::AlreadyExists.into())
            .into())
    }
}

impl VirtualNode for ArchivedFile {
    fn name(&self) -> String {
        self.logical.name().to_string()
    }

    fn logical_path(&self) -> &NestedPath {
        &self.logical
    }

    fn attributes(&self) -> NodeAttributes {
        match self.logical.extension() {
            Some(ext) if archive::is_supported_extension(&ext) => NodeAttributes::Archive,
            _ => NodeAttributes::Normal,
        }
    }

    fn exists(&self) -> bool {
        true
    }

    fn length(&self) -> Option<u64> {
        Some(self.size)
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        self.mtime
    }
}

impl VirtualFile for ArchivedFile {
    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        let bytes = self.extractor.read_file(&self.inner_path)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn get_physical_path(&self) -> Result<PathBuf> {
        Ok(self.materialize()?.path().to_path_buf())
    }

    fn try_convert_to_directory(self: Arc<Self>) -> Result<Option<Arc<dyn VirtualDirectory>>> {
        let Some(ext) = self.logical.extension() else {
            return Ok(None);
        };
        if !archive::is_supported_extension(&ext) {
            return Ok(None);
        }
        let guard = self.materialize()?;
        let extractor = archive::open(guard.path())?;
        Ok(Some(ArchivedDirectory::archive_root(
            extractor,
            self.logical.combine("")?,
            Some(guard),
        )))
    }
}
