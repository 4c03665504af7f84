use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use zip::ZipArchive;

use super::{ArchiveEntry, ArchiveExtractor};
use crate::error::{Error, Result};

struct IndexedEntry {
    /// Normalized interior path with `/` separators, no trailing slash.
    inner_path: String,
    /// Name exactly as stored in the archive, for `by_name` lookups.
    raw_name: String,
    size: u64,
    last_write_time: Option<SystemTime>,
    is_dir: bool,
}

/// Zip-backed extractor. The central directory is scanned once on open and
/// kept as a flat index; listing calls bucket that index by path prefix
/// instead of rescanning the archive.
pub struct ZipExtractor {
    path: PathBuf,
    archive: Mutex<ZipArchive<BufReader<fs::File>>>,
    index: Vec<IndexedEntry>,
}

impl ZipExtractor {
    pub fn open(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .map_err(|e| Error::ArchiveCorrupt(format!("{}: {}", path.display(), e)))?;
        let mut archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| Error::ArchiveCorrupt(format!("{}: {}", path.display(), e)))?;

        let mut index = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive
                .by_index(i)
                .map_err(|e| Error::ArchiveCorrupt(format!("entry #{}: {}", i, e)))?;
            // Entries escaping the archive root are skipped, same as when
            // extracting to disk.
            let Some(rel) = entry.enclosed_name().map(|p| p.to_owned()) else {
                continue;
            };
            let inner_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if inner_path.is_empty() {
                continue;
            }
            index.push(IndexedEntry {
                inner_path,
                raw_name: entry.name().to_string(),
                size: entry.size(),
                last_write_time: dos_datetime_to_system_time(entry.last_modified()),
                is_dir: entry.is_dir(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            archive: Mutex::new(archive),
            index,
        })
    }

    fn find_entry(&self, inner_path: &str) -> Result<&IndexedEntry> {
        self.index
            .iter()
            .find(|e| !e.is_dir && e.inner_path == inner_path)
            .ok_or_else(|| {
                Error::ArchiveCorrupt(format!(
                    "no entry '{}' in {}",
                    inner_path,
                    self.path.display()
                ))
            })
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn archive_path(&self) -> &Path {
        &self.path
    }

    fn list_directories(&self, inner_prefix: &str) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for entry in &self.index {
            let Some(rest) = strip_prefix(&entry.inner_path, inner_prefix) else {
                continue;
            };
            match rest.split_once('/') {
                // A deeper entry implies this child component is a directory.
                Some((head, _)) => {
                    names.insert(head.to_string());
                }
                None if entry.is_dir => {
                    names.insert(rest.to_string());
                }
                None => {}
            }
        }
        names.remove("");
        Ok(names.into_iter().collect())
    }

    fn list_files(&self, inner_prefix: &str) -> Result<Vec<ArchiveEntry>> {
        let mut files = Vec::new();
        for entry in &self.index {
            if entry.is_dir {
                continue;
            }
            let Some(rest) = strip_prefix(&entry.inner_path, inner_prefix) else {
                continue;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            files.push(ArchiveEntry {
                name: rest.to_string(),
                inner_path: entry.inner_path.clone(),
                size: entry.size,
                last_write_time: entry.last_write_time,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    fn extract_file(&self, inner_path: &str, dest: &mut dyn Write) -> Result<u64> {
        let raw_name = self.find_entry(inner_path)?.raw_name.clone();
        let mut archive = match self.archive.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        let mut entry = archive
            .by_name(&raw_name)
            .map_err(|e| Error::ArchiveCorrupt(format!("entry '{}': {}", inner_path, e)))?;
        let written = std::io::copy(&mut entry, dest)
            .map_err(|e| Error::ArchiveCorrupt(format!("entry '{}': {}", inner_path, e)))?;
        Ok(written)
    }

    fn file_size(&self, inner_path: &str) -> Result<u64> {
        Ok(self.find_entry(inner_path)?.size)
    }

    fn file_last_write_time(&self, inner_path: &str) -> Result<Option<SystemTime>> {
        Ok(self.find_entry(inner_path)?.last_write_time)
    }
}

/// Remainder of `inner_path` under `prefix`, or None when not nested.
fn strip_prefix<'a>(inner_path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(inner_path);
    }
    inner_path
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// Zip stores MS-DOS date/time fields. The packed value only feeds
/// change-detection fingerprints, so equality matters and calendar accuracy
/// does not; leap rules are ignored.
fn dos_datetime_to_system_time(dt: zip::DateTime) -> Option<SystemTime> {
    let days = (dt.year() as u64)
        .checked_sub(1980)?
        .wrapping_mul(366)
        .wrapping_add(dt.month() as u64 * 31)
        .wrapping_add(dt.day() as u64);
    let secs = days * 86_400
        + dt.hour() as u64 * 3600
        + dt.minute() as u64 * 60
        + dt.second() as u64;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write as _;

    /// Builds a zip in memory from (name, bytes) pairs. Shared with the fs
    /// tests that exercise nested archives.
    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::FileOptions::default();
            for (name, bytes) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(bytes).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    pub(crate) fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join("nestview-tests")
            .join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_zip(dir: &Path, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, build_zip(entries)).unwrap();
        path
    }

    #[test]
    fn synthesizes_directories_from_flat_entries() {
        let dir = scratch_dir();
        let path = write_zip(
            &dir,
            "a.zip",
            &[
                ("top.txt", b"t".as_slice()),
                ("docs/readme.md", b"r".as_slice()),
                ("docs/img/cat.png", b"c".as_slice()),
                ("music/song.ogg", b"s".as_slice()),
            ],
        );
        let ext = ZipExtractor::open(&path).unwrap();

        assert_eq!(ext.list_directories("").unwrap(), vec!["docs", "music"]);
        let root_files = ext.list_files("").unwrap();
        assert_eq!(root_files.len(), 1);
        assert_eq!(root_files[0].name, "top.txt");

        assert_eq!(ext.list_directories("docs").unwrap(), vec!["img"]);
        let docs_files = ext.list_files("docs").unwrap();
        assert_eq!(docs_files.len(), 1);
        assert_eq!(docs_files[0].inner_path, "docs/readme.md");

        assert!(ext.list_directories("docs/img").unwrap().is_empty());
        assert_eq!(ext.list_files("docs/img").unwrap()[0].name, "cat.png");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn reads_entry_bytes_and_metadata() {
        let dir = scratch_dir();
        let path = write_zip(&dir, "b.zip", &[("data/blob.bin", b"hello zip".as_slice())]);
        let ext = ZipExtractor::open(&path).unwrap();

        assert_eq!(ext.file_size("data/blob.bin").unwrap(), 9);
        assert!(ext.file_last_write_time("data/blob.bin").unwrap().is_some());
        assert_eq!(ext.read_file("data/blob.bin").unwrap(), b"hello zip");

        match ext.read_file("data/missing.bin") {
            Err(Error::ArchiveCorrupt(_)) => {}
            other => panic!("expected ArchiveCorrupt, got {:?}", other),
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_archive_is_rejected_on_open() {
        let dir = scratch_dir();
        let path = dir.join("broken.zip");
        fs::write(&path, b"this is not a zip file").unwrap();
        match ZipExtractor::open(&path) {
            Err(Error::ArchiveCorrupt(_)) => {}
            other => panic!("expected ArchiveCorrupt, got {:?}", other.err()),
        }
        let _ = fs::remove_dir_all(dir);
    }
}
