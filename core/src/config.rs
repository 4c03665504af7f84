//! Generator configuration: where cache stores live, how many background
//! workers may decode concurrently, and the optional store passphrase.

use std::path::PathBuf;

/// Environment variable consulted for the optional cache passphrase.
pub const PASSPHRASE_ENV: &str = "NESTVIEW_CACHE_PASSPHRASE";

pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Directory holding the cache store file(s).
    pub data_dir: PathBuf,
    /// Bound on concurrent decode/extract work. Always >= 1.
    pub concurrency: usize,
    /// When set, stored thumbnail blobs are sealed with a key derived from
    /// this passphrase.
    pub passphrase: Option<String>,
}

impl GeneratorConfig {
    /// Config rooted at `data_dir`, passphrase taken from the environment.
    pub fn new(data_dir: PathBuf) -> Self {
        let passphrase = std::env::var(PASSPHRASE_ENV)
            .ok()
            .filter(|p| !p.is_empty());
        Self {
            data_dir,
            concurrency: DEFAULT_CONCURRENCY,
            passphrase,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_passphrase(mut self, passphrase: Option<String>) -> Self {
        self.passphrase = passphrase;
        self
    }

    /// Platform data directory for nestview, with a temp-dir fallback for
    /// environments without one.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("nestview")
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::new(Self::default_data_dir())
    }
}
