use crate::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_PRIORITY: i32 = 50;
pub const MAX_NAME_LEN: usize = 64;

const TAR_EXTENSIONS: &[&str] = &[
    ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz", ".tar.zst",
];
const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tar.xz", ".txz", ".tar.zst", ".zip", ".7z",
];
const SQUASHFS_EXTENSIONS: &[&str] = &[".squashfs", ".squash", ".sqfs", ".squashfs.img"];

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Core,
    Stable,
    Testing,
    #[default]
    Experimental,
    Broken,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Core => write!(f, "core"),
            Quality::Stable => write!(f, "stable"),
            Quality::Testing => write!(f, "testing"),
            Quality::Experimental => write!(f, "experimental"),
            Quality::Broken => write!(f, "broken"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Official,
    #[default]
    Unofficial,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Official => write!(f, "official"),
            Status::Unofficial => write!(f, "unofficial"),
        }
    }
}

/// Transport tag of a [`Source`].
///
/// The set is closed; tags outside it are kept verbatim in `Unknown` so a
/// catalog written by a newer tool still round-trips, and dispatch reports
/// them as unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceKind {
    Git,
    Mercurial,
    Bazaar,
    Subversion,
    Cvs,
    Darcs,
    Rsync,
    Tar,
    Archive,
    Squashfs,
    GSorcery,
    Stub,
    Unknown(String),
}

impl SourceKind {
    pub const KNOWN: [SourceKind; 12] = [
        SourceKind::Git,
        SourceKind::Mercurial,
        SourceKind::Bazaar,
        SourceKind::Subversion,
        SourceKind::Cvs,
        SourceKind::Darcs,
        SourceKind::Rsync,
        SourceKind::Tar,
        SourceKind::Archive,
        SourceKind::Squashfs,
        SourceKind::GSorcery,
        SourceKind::Stub,
    ];

    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "git" => SourceKind::Git,
            "mercurial" | "hg" => SourceKind::Mercurial,
            "bazaar" | "bzr" => SourceKind::Bazaar,
            "subversion" | "svn" => SourceKind::Subversion,
            "cvs" => SourceKind::Cvs,
            "darcs" => SourceKind::Darcs,
            "rsync" => SourceKind::Rsync,
            "tar" => SourceKind::Tar,
            "archive" => SourceKind::Archive,
            "squashfs" => SourceKind::Squashfs,
            "g-sorcery" => SourceKind::GSorcery,
            "stub" => SourceKind::Stub,
            _ => SourceKind::Unknown(tag.trim().to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Mercurial => "mercurial",
            SourceKind::Bazaar => "bazaar",
            SourceKind::Subversion => "subversion",
            SourceKind::Cvs => "cvs",
            SourceKind::Darcs => "darcs",
            SourceKind::Rsync => "rsync",
            SourceKind::Tar => "tar",
            SourceKind::Archive => "archive",
            SourceKind::Squashfs => "squashfs",
            SourceKind::GSorcery => "g-sorcery",
            SourceKind::Stub => "stub",
            SourceKind::Unknown(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SourceKind::Unknown(_))
    }

    /// Kinds whose working copy is materialized from a single downloaded file.
    pub fn is_archive(&self) -> bool {
        !self.archive_extensions().is_empty()
    }

    pub fn archive_extensions(&self) -> &'static [&'static str] {
        match self {
            SourceKind::Tar => TAR_EXTENSIONS,
            SourceKind::Archive => ARCHIVE_EXTENSIONS,
            SourceKind::Squashfs => SQUASHFS_EXTENSIONS,
            _ => &[],
        }
    }
}

impl From<String> for SourceKind {
    fn from(s: String) -> Self {
        SourceKind::parse(&s)
    }
}

impl From<&str> for SourceKind {
    fn from(s: &str) -> Self {
        SourceKind::parse(s)
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Unknown(tag) => tag,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of obtaining an overlay's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
            branch: None,
            subpath: None,
        }
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    #[must_use]
    pub fn with_subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    /// URL scheme, or `None` for locators that are not URLs (CVS roots).
    pub fn scheme(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .map(|u| u.scheme().to_owned())
    }

    /// The recognized archive extension the URL path ends in, longest match wins.
    pub fn archive_extension(&self) -> Option<&'static str> {
        let path = match url::Url::parse(&self.url) {
            Ok(u) => u.path().to_ascii_lowercase(),
            Err(_) => self.url.to_ascii_lowercase(),
        };
        self.kind
            .archive_extensions()
            .iter()
            .copied()
            .filter(|ext| path.ends_with(ext))
            .max_by_key(|ext| ext.len())
    }

    fn is_cvs_root(&self) -> bool {
        self.kind == SourceKind::Cvs && (self.url.starts_with(':') || self.url.starts_with('/'))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("source URL must not be empty".to_owned());
        }
        if !self.is_cvs_root() {
            url::Url::parse(&self.url)
                .map_err(|e| format!("source URL '{}' is not a valid URL: {e}", self.url))?;
        }
        if self.kind.is_archive() && self.archive_extension().is_none() {
            return Err(format!(
                "{} source URL '{}' must end in one of: {}",
                self.kind,
                self.url,
                self.kind.archive_extensions().join(", ")
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email: String,
}

impl Owner {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }
}

/// The catalog unit: one overlay and the sources it can be obtained from.
///
/// Field order is significant for the TOML format, where plain values must
/// precede arrays of tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub owner: Vec<Owner>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Overlay {
    pub fn new(name: impl Into<String>, owner_email: impl Into<String>, source: Source) -> Self {
        Self {
            name: name.into(),
            description: Vec::new(),
            homepage: None,
            irc: None,
            feeds: Vec::new(),
            priority: DEFAULT_PRIORITY,
            quality: Quality::default(),
            status: Status::default(),
            owner: vec![Owner::new(owner_email)],
            sources: vec![source],
        }
    }

    /// The source a working copy was installed from. Installed records keep it first.
    pub fn primary_source(&self) -> Option<&Source> {
        self.sources.first()
    }

    pub fn source_urls(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.url.as_str())
    }

    pub fn has_source_url(&self, url: &str) -> bool {
        self.source_urls().any(|u| u == url)
    }

    /// A copy with `chosen` moved to the front of `sources`, keeping the rest in order.
    #[must_use]
    pub fn with_primary_source(&self, chosen: &Source) -> Self {
        let mut copy = self.clone();
        copy.sources.retain(|s| s != chosen);
        copy.sources.insert(0, chosen.clone());
        copy
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        validate_name(&self.name)?;
        let invalid = |reason: String| CatalogError::Invalid {
            name: self.name.clone(),
            reason,
        };
        if self.owner.is_empty() {
            return Err(invalid("at least one owner is required".to_owned()));
        }
        if self.owner.iter().any(|o| o.email.trim().is_empty()) {
            return Err(invalid("owner email must not be empty".to_owned()));
        }
        if !(1..=99).contains(&self.priority) {
            return Err(invalid(format!(
                "priority {} is outside 1..=99",
                self.priority
            )));
        }
        if self.sources.is_empty() {
            return Err(invalid("at least one source is required".to_owned()));
        }
        for source in &self.sources {
            source.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

pub fn validate_name(name: &str) -> Result<(), CatalogError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(CatalogError::InvalidName(format!(
            "'{name}': overlay name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CatalogError::InvalidName(format!(
            "'{name}': overlay name must match [a-zA-Z0-9_-]"
        )));
    }
    Ok(())
}
