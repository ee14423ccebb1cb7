//! Remote overlay feeds for Strata.
//!
//! This crate downloads feed documents into a local cache directory, one file
//! per feed URL, with conditional requests against the previous download.
//! A body replaces the cached copy only once it parses as a catalog document.

pub mod cache;
pub mod config;
pub mod fetch;

pub use cache::{CacheMeta, FeedCache};
pub use config::FetchConfig;
pub use fetch::{FetchReport, Fetcher};

use strata_catalog::{CatalogError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not resolve host for {0}")]
    HostNotFound(String),
    #[error("timed out fetching {0}")]
    Timeout(String),
    #[error("connection failed for {url}: {reason}")]
    Connection { url: String, reason: String },
    #[error("HTTP {code} for {url}")]
    Status { url: String, code: u16 },
    #[error("server answered 304 Not Modified for {0} but no cached copy exists")]
    NotModifiedUncached(String),
    #[error("HTTP error for {url}: {reason}")]
    Http { url: String, reason: String },
    #[error("{program} failed for {url} (exit code {code}): {message}")]
    Tool {
        program: String,
        url: String,
        code: i32,
        message: String,
    },
    #[error("unsupported feed location: {0}")]
    UnsupportedLocation(String),
    #[error("feed {url} is not a catalog document: {source}")]
    Invalid {
        url: String,
        #[source]
        source: CatalogError,
    },
    #[error("cache error: {0}")]
    Cache(#[from] strata_store::StoreError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RemoteError {
    /// Whether another attempt could succeed: timeouts, dropped connections,
    /// server-side (5xx) failures and transient curl exits. Name resolution
    /// failures and client (4xx) errors are final.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout(_) | RemoteError::Connection { .. } | RemoteError::Io(_) => true,
            RemoteError::Status { code, .. } => *code >= 500,
            // curl: 7 = connect failed, 28 = timeout, 52/56 = empty reply / recv error
            RemoteError::Tool { code, .. } => matches!(code, 7 | 28 | 52 | 56),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::Invalid { .. } | RemoteError::Serialization(_) => ErrorKind::Corrupt,
            _ => ErrorKind::NetworkError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let e503 = RemoteError::Status {
            url: "https://example.org/feed.json".to_owned(),
            code: 503,
        };
        let e404 = RemoteError::Status {
            url: "https://example.org/feed.json".to_owned(),
            code: 404,
        };
        assert!(e503.is_transient());
        assert!(!e404.is_transient());
        assert!(e404.to_string().contains("HTTP 404"));
    }

    #[test]
    fn dns_failure_is_not_retried() {
        let e = RemoteError::HostNotFound("https://nope.invalid/feed.json".to_owned());
        assert!(!e.is_transient());
        assert_eq!(e.kind(), ErrorKind::NetworkError);
    }

    #[test]
    fn curl_exit_codes_classified() {
        let tool = |code| RemoteError::Tool {
            program: "curl".to_owned(),
            url: "ftp://example.org/feed.json".to_owned(),
            code,
            message: String::new(),
        };
        assert!(tool(28).is_transient());
        assert!(tool(7).is_transient());
        assert!(!tool(6).is_transient());
        assert!(!tool(22).is_transient());
    }

    #[test]
    fn invalid_document_is_corrupt() {
        let e = RemoteError::Invalid {
            url: "https://example.org/feed.json".to_owned(),
            source: CatalogError::Serialization("bad".to_owned()),
        };
        assert_eq!(e.kind(), ErrorKind::Corrupt);
        assert!(e.to_string().contains("not a catalog document"));
    }
}
