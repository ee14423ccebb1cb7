//! On-disk catalog formats.
//!
//! A format is selected per file by inspecting its first bytes, never by the
//! file extension. JSON is canonical: the installed catalog is always written
//! with [`JsonFormat`]. Public feeds are XML ([`XmlFormat`]), and
//! [`TomlFormat`] exists for hand-maintained local definition files.

use crate::overlay::Overlay;
use crate::xml::XmlFormat;
use crate::CatalogError;
use serde::{Deserialize, Serialize};

/// Document version written by this crate. Newer documents are rejected.
pub const FORMAT_VERSION: u32 = 1;

pub trait CatalogFormat: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `bytes` look like a document of this format.
    fn sniff(&self, bytes: &[u8]) -> bool;

    fn read(&self, bytes: &[u8]) -> Result<Vec<Overlay>, CatalogError>;

    fn write(&self, overlays: &[Overlay]) -> Result<Vec<u8>, CatalogError>;
}

fn format_version() -> u32 {
    FORMAT_VERSION
}

fn check_version(version: u32) -> Result<(), CatalogError> {
    if version > FORMAT_VERSION {
        return Err(CatalogError::Corrupt {
            origin: String::new(),
            reason: format!("unsupported catalog version {version}, expected {FORMAT_VERSION}"),
        });
    }
    Ok(())
}

pub(crate) fn first_significant_byte(bytes: &[u8]) -> Option<u8> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    bytes.iter().copied().find(|b| !b.is_ascii_whitespace())
}

#[derive(Deserialize)]
struct JsonDocument {
    #[serde(default = "format_version")]
    version: u32,
    #[serde(default)]
    overlays: Vec<Overlay>,
}

#[derive(Serialize)]
struct JsonDocumentOut<'a> {
    version: u32,
    overlays: &'a [Overlay],
}

pub struct JsonFormat;

impl CatalogFormat for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        first_significant_byte(bytes) == Some(b'{')
    }

    fn read(&self, bytes: &[u8]) -> Result<Vec<Overlay>, CatalogError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let doc: JsonDocument =
            serde_json::from_slice(bytes).map_err(|e| CatalogError::Corrupt {
                origin: String::new(),
                reason: e.to_string(),
            })?;
        check_version(doc.version)?;
        Ok(doc.overlays)
    }

    fn write(&self, overlays: &[Overlay]) -> Result<Vec<u8>, CatalogError> {
        let doc = JsonDocumentOut {
            version: FORMAT_VERSION,
            overlays,
        };
        let mut out = serde_json::to_vec_pretty(&doc)
            .map_err(|e| CatalogError::Serialization(e.to_string()))?;
        out.push(b'\n');
        Ok(out)
    }
}

#[derive(Deserialize)]
struct TomlDocument {
    #[serde(default = "format_version")]
    version: u32,
    #[serde(default)]
    overlay: Vec<Overlay>,
}

#[derive(Serialize)]
struct TomlDocumentOut<'a> {
    version: u32,
    overlay: &'a [Overlay],
}

pub struct TomlFormat;

impl CatalogFormat for TomlFormat {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        std::str::from_utf8(bytes).is_ok()
            && !matches!(first_significant_byte(bytes), Some(b'{' | b'<'))
    }

    fn read(&self, bytes: &[u8]) -> Result<Vec<Overlay>, CatalogError> {
        let text = std::str::from_utf8(bytes).map_err(|e| CatalogError::Corrupt {
            origin: String::new(),
            reason: e.to_string(),
        })?;
        let doc: TomlDocument = toml::from_str(text).map_err(|e| CatalogError::Corrupt {
            origin: String::new(),
            reason: e.to_string(),
        })?;
        check_version(doc.version)?;
        Ok(doc.overlay)
    }

    fn write(&self, overlays: &[Overlay]) -> Result<Vec<u8>, CatalogError> {
        let doc = TomlDocumentOut {
            version: FORMAT_VERSION,
            overlay: overlays,
        };
        let text =
            toml::to_string(&doc).map_err(|e| CatalogError::Serialization(e.to_string()))?;
        Ok(text.into_bytes())
    }
}

/// Registered formats in sniffing order.
pub fn formats() -> [&'static dyn CatalogFormat; 3] {
    [&JsonFormat, &XmlFormat, &TomlFormat]
}

pub fn detect(bytes: &[u8]) -> Option<&'static dyn CatalogFormat> {
    formats().into_iter().find(|f| f.sniff(bytes))
}

/// Parse a catalog document of any registered format.
pub fn parse_document(bytes: &[u8]) -> Result<Vec<Overlay>, CatalogError> {
    let format = detect(bytes).ok_or_else(|| CatalogError::Corrupt {
        origin: String::new(),
        reason: "unrecognized catalog format".to_owned(),
    })?;
    format.read(bytes)
}
