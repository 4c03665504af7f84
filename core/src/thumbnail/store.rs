//! Persistent thumbnail cache on SQLite.
//!
//! Entry metadata and frames live in two tables joined by the encoded cache
//! id. Writes are transactional: an interrupted overwrite leaves the previous
//! entry intact, never a half-written one.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::ThumbnailCacheEntry;
use crate::error::{Error, Result};
use crate::fs::FileFingerprint;

const NONCE_LEN: usize = 12;

pub struct ThumbnailStore {
    db: Arc<Mutex<Connection>>,
    cipher: Option<ChaCha20Poly1305>,
}

impl ThumbnailStore {
    /// Opens (creating if needed) the cache database. When a passphrase is
    /// given, frame blobs are sealed at rest; opening an existing cache with
    /// a different passphrase just yields misses.
    pub fn open(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        db.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS thumbnails (
                 key         TEXT PRIMARY KEY,
                 src_len     INTEGER NOT NULL,
                 src_mtime   INTEGER NOT NULL,
                 created_at  INTEGER NOT NULL,
                 frame_count INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS thumbnail_frames (
                 key      TEXT NOT NULL,
                 frame_no INTEGER NOT NULL,
                 content  BLOB NOT NULL,
                 PRIMARY KEY (key, frame_no)
             );",
        )?;
        let cipher = passphrase.map(|p| {
            let digest = Sha256::digest(p.as_bytes());
            ChaCha20Poly1305::new(Key::from_slice(digest.as_slice()))
        });
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            cipher,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.db.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Looks up an entry by encoded cache id. Fingerprint validation is the
    /// caller's job; a blob that fails to unseal reads as a miss.
    pub fn find_one(&self, key: &str) -> Result<Option<ThumbnailCacheEntry>> {
        let db = self.lock();
        let row = db
            .query_row(
                "SELECT src_len, src_mtime, created_at, frame_count
                 FROM thumbnails WHERE key = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((src_len, src_mtime, created_at, frame_count)) = row else {
            return Ok(None);
        };

        let mut stmt = db.prepare(
            "SELECT content FROM thumbnail_frames WHERE key = ?1 ORDER BY frame_no",
        )?;
        let mut frames = Vec::with_capacity(frame_count.max(0) as usize);
        let mut rows = stmt.query(params![key])?;
        while let Some(row) = rows.next()? {
            let sealed: Vec<u8> = row.get(0)?;
            match self.unseal(&sealed) {
                Some(bytes) => frames.push(bytes),
                None => {
                    log::debug!("cache entry {} failed to unseal, treating as miss", key);
                    return Ok(None);
                }
            }
        }
        if frames.len() as i64 != frame_count {
            log::warn!("cache entry {} has inconsistent frame count", key);
            return Ok(None);
        }
        Ok(Some(ThumbnailCacheEntry {
            fingerprint: FileFingerprint {
                length: src_len as u64,
                mtime_ms: src_mtime,
            },
            created_at_ms: created_at,
            frames,
        }))
    }

    /// Inserts or replaces the entry for `key` in one transaction.
    pub fn insert(
        &self,
        key: &str,
        fingerprint: FileFingerprint,
        frames: &[Vec<u8>],
    ) -> Result<()> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let sealed: Vec<Vec<u8>> = frames.iter().map(|f| self.seal(f)).collect();

        let mut db = self.lock();
        let tx = db
            .transaction()
            .map_err(|e| Error::CacheTransaction(e.to_string()))?;
        tx.execute(
            "DELETE FROM thumbnail_frames WHERE key = ?1",
            params![key],
        )
        .map_err(|e| Error::CacheTransaction(e.to_string()))?;
        tx.execute(
            "INSERT OR REPLACE INTO thumbnails
                 (key, src_len, src_mtime, created_at, frame_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                fingerprint.length as i64,
                fingerprint.mtime_ms,
                created_at,
                sealed.len() as i64
            ],
        )
        .map_err(|e| Error::CacheTransaction(e.to_string()))?;
        for (i, content) in sealed.iter().enumerate() {
            tx.execute(
                "INSERT INTO thumbnail_frames (key, frame_no, content) VALUES (?1, ?2, ?3)",
                params![key, i as i64, content],
            )
            .map_err(|e| Error::CacheTransaction(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| Error::CacheTransaction(e.to_string()))?;
        Ok(())
    }

    fn seal(&self, plain: &[u8]) -> Vec<u8> {
        match &self.cipher {
            None => plain.to_vec(),
            Some(cipher) => {
                let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
                // Encryption with a fresh random nonce cannot fail for
                // in-memory buffers.
                let mut sealed = cipher.encrypt(&nonce, plain).unwrap_or_default();
                let mut out = nonce.to_vec();
                out.append(&mut sealed);
                out
            }
        }
    }

    fn unseal(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        match &self.cipher {
            None => Some(sealed.to_vec()),
            Some(cipher) => {
                if sealed.len() < NONCE_LEN {
                    return None;
                }
                let (nonce, body) = sealed.split_at(NONCE_LEN);
                cipher.decrypt(Nonce::from_slice(nonce), body).ok()
            }
        }
    }
}
