use crate::backend::{check_source, Target, Transport};
use crate::TransportError;
use std::fs;
use strata_catalog::{Source, SourceKind};

/// Name of the file a stub working copy consists of.
pub const STUB_MARKER: &str = ".strata-stub";

/// A deterministic transport that needs no external tool.
///
/// `stub://fail/...` fails like a broken tool and `stub://unreachable/...`
/// like an offline remote. Any other URL produces a working copy holding only
/// a marker file with the URL it was created from.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubTransport;

impl StubTransport {
    pub fn new() -> Self {
        Self
    }

    fn materialize(target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let url = target.source.url.as_str();
        let host = url
            .strip_prefix("stub://")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default();
        match host {
            "fail" => Err(TransportError::Failed {
                tool: "stub".to_owned(),
                code: 1,
                message: format!("simulated failure for {url}"),
            }),
            "unreachable" => Err(TransportError::Network {
                tool: "stub".to_owned(),
                message: format!("could not resolve host for {url}"),
            }),
            _ => {
                let path = target.path();
                fs::create_dir_all(&path)?;
                fs::write(path.join(STUB_MARKER), format!("{url}\n"))?;
                Ok(())
            }
        }
    }
}

impl Transport for StubTransport {
    fn kind(&self) -> SourceKind {
        SourceKind::Stub
    }

    fn required_tools(&self, _source: &Source) -> Vec<String> {
        Vec::new()
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        Self::materialize(target)
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        Self::materialize(target)
    }

    fn update_url(&self, _target: &Target<'_>, _old: &Source) -> Result<bool, TransportError> {
        Ok(true)
    }
}
