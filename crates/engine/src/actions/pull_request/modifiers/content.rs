//! Content modifier: expand declared file entries against the action scope.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{FsModifier, ModifierSpawn};
use crate::actions::pull_request::fsentry::{FsEntry, GIT_MODE_FILE};
use crate::errors::FactoryError;
use crate::models::{ModificationConfig, PrContentEntry};
use crate::templates::{render_bounded, MAX_CONTENT_BYTES, MAX_PATH_BYTES};

/// Writes a declared list of templated files into the working tree.
pub struct ContentModifier {
    contents: Vec<PrContentEntry>,
    entries: Vec<FsEntry>,
}

impl ContentModifier {
    /// Registry constructor.
    pub fn spawn(spawn: &ModifierSpawn<'_>) -> Result<Box<dyn FsModifier>, FactoryError> {
        let ModificationConfig::Content(config) = &spawn.config.modification else {
            return Err(FactoryError::MissingConfig {
                class: "modification",
                method: super::METHOD_CONTENT,
            });
        };
        if config.contents.is_empty() {
            return Err(FactoryError::MissingConfig {
                class: "modification",
                method: super::METHOD_CONTENT,
            });
        }
        Ok(Box::new(Self {
            contents: config.contents.clone(),
            entries: Vec::new(),
        }))
    }
}

#[async_trait]
impl FsModifier for ContentModifier {
    // Template expansion is CPU-only and bounded, so the token is not
    // consulted here.
    async fn create_entries(
        &mut self,
        _root: &Path,
        scope: &Value,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut entries = Vec::with_capacity(self.contents.len());
        for declared in &self.contents {
            let path = render_bounded(&declared.path, scope, MAX_PATH_BYTES)?;
            let content = render_bounded(&declared.content, scope, MAX_CONTENT_BYTES)?;
            entries.push(FsEntry {
                path,
                content,
                mode: declared
                    .mode
                    .clone()
                    .unwrap_or_else(|| GIT_MODE_FILE.to_string()),
            });
        }
        self.entries = entries;
        Ok(())
    }

    fn entries(&self) -> &[FsEntry] {
        &self.entries
    }
}
