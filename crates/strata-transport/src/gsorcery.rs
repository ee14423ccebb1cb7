use crate::backend::{check_source, Target, Toolbox, Transport};
use crate::runner::Invocation;
use crate::TransportError;
use std::fs;
use strata_catalog::{Source, SourceKind};

/// Overlays generated by a g-sorcery driver. The driver program is named by
/// the source's branch.
pub struct GSorceryTransport {
    toolbox: Toolbox,
}

impl GSorceryTransport {
    pub fn new(toolbox: Toolbox) -> Self {
        Self { toolbox }
    }

    fn driver(source: &Source) -> Result<&str, TransportError> {
        source.branch.as_deref().ok_or_else(|| {
            TransportError::InvalidArgument(format!(
                "g-sorcery source '{}' needs a branch naming its driver",
                source.url
            ))
        })
    }

    fn generate(&self, target: &Target<'_>) -> Result<(), TransportError> {
        check_source(target.source)?;
        let driver = Self::driver(target.source)?;
        let path = target.path();
        fs::create_dir_all(&path)?;
        for step in ["sync", "generate-tree"] {
            self.toolbox.run(
                Invocation::new(driver)
                    .arg("-o")
                    .path_arg(&path)
                    .args(["-r", target.source.url.as_str(), step]),
            )?;
        }
        Ok(())
    }
}

impl Transport for GSorceryTransport {
    fn kind(&self) -> SourceKind {
        SourceKind::GSorcery
    }

    fn required_tools(&self, source: &Source) -> Vec<String> {
        source.branch.iter().cloned().collect()
    }

    fn add(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.generate(target)
    }

    fn sync(&self, target: &Target<'_>) -> Result<(), TransportError> {
        self.generate(target)
    }
}
