//! Physical filesystem variant of the virtual node traits.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::{NodeAttributes, VirtualDirectory, VirtualFile, VirtualNode};
use crate::archive;
use crate::error::Result;
use crate::fs::archived::ArchivedDirectory;
use crate::nested_path::NestedPath;

pub struct LocalDirectory {
    path: PathBuf,
    logical: NestedPath,
}

impl LocalDirectory {
    /// Root constructor: the directory's own physical path becomes the first
    /// logical segment.
    pub fn new(path: &Path) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            logical: NestedPath::from_physical(path)?,
        }))
    }
}

impl VirtualNode for LocalDirectory {
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
        self.path.is_dir()
    }

    fn length(&self) -> Option<u64> {
        None
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).ok().and_then(|m| m.modified().ok())
    }
}

impl VirtualDirectory for LocalDirectory {
    fn find_directories(&self) -> Result<Vec<Arc<dyn VirtualDirectory>>> {
        let mut out: Vec<Arc<dyn VirtualDirectory>> = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            out.push(Arc::new(LocalDirectory {
                path: entry.path(),
                logical: self.logical.join(&name)?,
            }));
        }
        out.sort_by(|a, b| a.logical_path().cmp(b.logical_path()));
        Ok(out)
    }

    fn find_files(&self) -> Result<Vec<Arc<dyn VirtualFile>>> {
        let mut out: Vec<Arc<dyn VirtualFile>> = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.path().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            out.push(Arc::new(LocalFile {
                path: entry.path(),
                logical: self.logical.join(&name)?,
            }));
        }
        out.sort_by(|a, b| a.logical_path().cmp(b.logical_path()));
        Ok(out)
    }
}

pub struct LocalFile {
    path: PathBuf,
    logical: NestedPath,
}

impl LocalFile {
    pub fn new(path: &Path) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            logical: NestedPath::from_physical(path)?,
        }))
    }
}

impl VirtualNode for LocalFile {
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
        self.path.is_file()
    }

    fn length(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }

    fn last_write_time(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).ok().and_then(|m| m.modified().ok())
    }
}

impl VirtualFile for LocalFile {
    fn open_read(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }

    fn get_physical_path(&self) -> Result<PathBuf> {
        Ok(self.path.clone())
    }

    fn try_convert_to_directory(self: Arc<Self>) -> Result<Option<Arc<dyn VirtualDirectory>>> {
        let Some(ext) = self.logical.extension() else {
            return Ok(None);
        };
        if !archive::is_supported_extension(&ext) {
            return Ok(None);
        }
        let extractor = archive::open(&self.path)?;
        let root = ArchivedDirectory::archive_root(extractor, self.logical.combine("")?, None);
        Ok(Some(root))
    }
}

/// "List drives/roots" primitive for the UI layer: the filesystem roots as
/// virtual directories.
pub fn list_roots() -> Result<Vec<Arc<dyn VirtualDirectory>>> {
    let mut out: Vec<Arc<dyn VirtualDirectory>> = Vec::new();
    #[cfg(windows)]
    {
        for letter in 'A'..='Z' {
            let path = PathBuf::from(format!("{}:\\", letter));
            if path.is_dir() {
                out.push(LocalDirectory::new(&path)?);
            }
        }
    }
    #[cfg(not(windows))]
    {
        out.push(LocalDirectory::new(Path::new("/"))?);
    }
    Ok(out)
}
