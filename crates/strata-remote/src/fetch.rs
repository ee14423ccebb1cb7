use crate::cache::{CacheMeta, FeedCache};
use crate::config::FetchConfig;
use crate::RemoteError;
use std::io::Read;
use std::path::PathBuf;
use std::process::Command;
use strata_catalog::{parse_document, Diagnostic};
use tracing::{debug, info, warn};

/// Result of refreshing a set of feeds.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// At least one cached document changed.
    pub changed: bool,
    /// Every feed has a usable copy, fresh or cached.
    pub ok: bool,
    pub warnings: Vec<Diagnostic>,
    /// Usable feed documents, in feed order.
    pub files: Vec<PathBuf>,
}

enum Location {
    Local(PathBuf),
    Http,
    External,
}

fn locate(url: &str) -> Result<Location, RemoteError> {
    if url.starts_with('/') {
        return Ok(Location::Local(PathBuf::from(url)));
    }
    let parsed =
        url::Url::parse(url).map_err(|_| RemoteError::UnsupportedLocation(url.to_owned()))?;
    match parsed.scheme() {
        "file" => parsed
            .to_file_path()
            .map(Location::Local)
            .map_err(|()| RemoteError::UnsupportedLocation(url.to_owned())),
        "http" | "https" => Ok(Location::Http),
        _ => Ok(Location::External),
    }
}

/// Outcome of one successful feed refresh.
struct Refreshed {
    path: PathBuf,
    changed: bool,
}

/// Downloads feed documents into a [`FeedCache`].
pub struct Fetcher {
    config: FetchConfig,
    cache: FeedCache,
    agent: ureq::Agent,
}

impl Fetcher {
    pub fn new(config: FetchConfig, cache: FeedCache) -> Self {
        // Proxy settings come from http_proxy / https_proxy.
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout()))
            .build();
        let agent = ureq::Agent::new_with_config(agent_config);
        Self {
            config,
            cache,
            agent,
        }
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// Refresh every feed.
    pub fn fetch(&self, feeds: &[String]) -> FetchReport {
        self.refresh(feeds, false)
    }

    /// Refresh only feeds without a cached copy; cached feeds are used as-is.
    pub fn fetch_missing(&self, feeds: &[String]) -> FetchReport {
        self.refresh(feeds, true)
    }

    fn refresh(&self, feeds: &[String], only_missing: bool) -> FetchReport {
        let mut report = FetchReport {
            ok: true,
            ..FetchReport::default()
        };
        for url in feeds {
            if only_missing && self.cache.has(url) {
                report.files.push(self.cache.path_for(url));
                continue;
            }
            match self.refresh_with_retries(url) {
                Ok(refreshed) => {
                    report.changed |= refreshed.changed;
                    report.files.push(refreshed.path);
                }
                Err(e) => {
                    let cached = self.cache.has(url);
                    let message = if cached {
                        format!("{e}; using cached copy")
                    } else {
                        e.to_string()
                    };
                    warn!("feed {url}: {message}");
                    report.warnings.push(Diagnostic::new(url.as_str(), e.kind(), message));
                    if cached {
                        report.files.push(self.cache.path_for(url));
                    } else {
                        report.ok = false;
                    }
                }
            }
        }
        report
    }

    fn refresh_with_retries(&self, url: &str) -> Result<Refreshed, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.refresh_one(url) {
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    debug!("transient failure for {url} ({e}), retry {attempt}");
                }
                other => return other,
            }
        }
    }

    fn refresh_one(&self, url: &str) -> Result<Refreshed, RemoteError> {
        match locate(url)? {
            Location::Local(path) => {
                let body = std::fs::read(&path)?;
                validate(url, &body)?;
                Ok(Refreshed {
                    path,
                    changed: false,
                })
            }
            Location::Http => self.refresh_http(url),
            Location::External => {
                let body = self.download_external(url)?;
                self.accept(url, &body, None, None)
            }
        }
    }

    fn refresh_http(&self, url: &str) -> Result<Refreshed, RemoteError> {
        let previous = if self.cache.has(url) {
            self.cache.meta(url)
        } else {
            None
        };

        let mut req = self.agent.get(url);
        if let Some(meta) = &previous {
            if let Some(etag) = &meta.etag {
                req = req.header("If-None-Match", etag.as_str());
            }
            if let Some(modified) = &meta.last_modified {
                req = req.header("If-Modified-Since", modified.as_str());
            }
        }
        debug!("GET {url}");
        let resp = req.call().map_err(|e| classify(url, e))?;

        let code = resp.status().as_u16();
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let etag = header("etag");
        let last_modified = header("last-modified");

        if code == 304 {
            // Only meaningful against a cached body; no request is retried
            // without validators, so an unsolicited 304 is final.
            if !self.cache.has(url) {
                return Err(RemoteError::NotModifiedUncached(url.to_owned()));
            }
            debug!("{url} not modified");
            let mut meta = previous.unwrap_or_else(|| CacheMeta {
                url: url.to_owned(),
                etag,
                last_modified,
                ..CacheMeta::default()
            });
            meta.fetched_at = chrono::Utc::now().to_rfc3339();
            self.cache.touch(url, &meta)?;
            return Ok(Refreshed {
                path: self.cache.path_for(url),
                changed: false,
            });
        }
        if code >= 300 {
            return Err(RemoteError::Status {
                url: url.to_owned(),
                code,
            });
        }

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Connection {
                url: url.to_owned(),
                reason: e.to_string(),
            })?;
        self.accept(url, &body, etag, last_modified)
    }

    fn download_external(&self, url: &str) -> Result<Vec<u8>, RemoteError> {
        std::fs::create_dir_all(self.cache.dir())?;
        let tmp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(self.cache.dir())?;
        let program = &self.config.fetch_command;
        debug!("{program} {url}");
        let output = Command::new(program)
            .arg("-fsSL")
            .arg("--max-time")
            .arg(self.config.timeout_secs.to_string())
            .arg("-o")
            .arg(tmp.path())
            .arg(url)
            .output()?;
        if !output.status.success() {
            return Err(RemoteError::Tool {
                program: program.clone(),
                url: url.to_owned(),
                code: output.status.code().unwrap_or(-1),
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(std::fs::read(tmp.path())?)
    }

    /// Store `body` for `url` if it parses. Identical content is not rewritten.
    fn accept(
        &self,
        url: &str,
        body: &[u8],
        etag: Option<String>,
        last_modified: Option<String>,
    ) -> Result<Refreshed, RemoteError> {
        validate(url, body)?;
        let changed = self.cache.read(url)?.as_deref() != Some(body);
        let meta = CacheMeta {
            url: url.to_owned(),
            etag,
            last_modified,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        };
        let path = if changed {
            info!("updated feed {url}");
            self.cache.store(url, body, &meta)?
        } else {
            self.cache.touch(url, &meta)?;
            self.cache.path_for(url)
        };
        Ok(Refreshed { path, changed })
    }
}

fn validate(url: &str, body: &[u8]) -> Result<(), RemoteError> {
    parse_document(body)
        .map(|_| ())
        .map_err(|source| RemoteError::Invalid {
            url: url.to_owned(),
            source,
        })
}

fn classify(url: &str, err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::StatusCode(code) => RemoteError::Status {
            url: url.to_owned(),
            code,
        },
        ureq::Error::Timeout(_) => RemoteError::Timeout(url.to_owned()),
        ureq::Error::HostNotFound => RemoteError::HostNotFound(url.to_owned()),
        ureq::Error::ConnectionFailed => RemoteError::Connection {
            url: url.to_owned(),
            reason: "connection failed".to_owned(),
        },
        ureq::Error::Io(e) => RemoteError::Connection {
            url: url.to_owned(),
            reason: e.to_string(),
        },
        other => RemoteError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
