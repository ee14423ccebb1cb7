use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Sidecar metadata for one cached feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub fetched_at: String,
}

/// One file per feed URL, named by a hash of the canonical URL.
#[derive(Debug, Clone)]
pub struct FeedCache {
    dir: PathBuf,
}

/// Parse and re-serialize `url` so equivalent spellings share a cache file.
pub fn canonical_url(url: &str) -> String {
    url::Url::parse(url).map_or_else(|_| url.to_owned(), |u| u.to_string())
}

fn extension_for(url: &str) -> &'static str {
    let path = url::Url::parse(url).map_or_else(|_| url.to_owned(), |u| u.path().to_owned());
    let path = path.to_ascii_lowercase();
    for ext in ["json", "toml", "xml"] {
        if path.ends_with(&format!(".{ext}")) {
            return ext;
        }
    }
    "cache"
}

impl FeedCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(url: &str) -> String {
        let hash = blake3::hash(canonical_url(url).as_bytes()).to_hex();
        hash[..32].to_owned()
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::stem(url), extension_for(url)))
    }

    pub fn meta_path_for(&self, url: &str) -> PathBuf {
        self.dir.join(format!("{}.meta.json", Self::stem(url)))
    }

    pub fn has(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    pub fn read(&self, url: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        match fs::read(self.path_for(url)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of the cached copy. Unreadable metadata is treated as absent
    /// so the next request is unconditional.
    pub fn meta(&self, url: &str) -> Option<CacheMeta> {
        let path = self.meta_path_for(url);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("ignoring corrupt cache metadata {}: {e}", path.display());
                None
            }
        }
    }

    /// Replace the cached copy of `url` and its metadata.
    pub fn store(&self, url: &str, body: &[u8], meta: &CacheMeta) -> Result<PathBuf, RemoteError> {
        let path = self.path_for(url);
        strata_store::write_atomic(&path, body)?;
        let meta_json = serde_json::to_string_pretty(meta)?;
        strata_store::write_atomic(&self.meta_path_for(url), meta_json.as_bytes())?;
        Ok(path)
    }

    /// Refresh only the metadata, e.g. after a 304.
    pub fn touch(&self, url: &str, meta: &CacheMeta) -> Result<(), RemoteError> {
        let meta_json = serde_json::to_string_pretty(meta)?;
        strata_store::write_atomic(&self.meta_path_for(url), meta_json.as_bytes())?;
        Ok(())
    }
}
