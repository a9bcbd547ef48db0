//! Pluggable filesystem modifications for the PR remediator.
//!
//! A *modifier* computes the intended file entries for a remediation in
//! memory, then writes them into the working tree when asked. Modifiers are
//! registered in a factory table keyed by the method string embedded in
//! profile YAML.

pub mod content;
pub mod tag_resolve;
pub mod yaml_expr;

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::fsentry::{self, FsEntry};
use crate::errors::FactoryError;
use crate::models::PullRequestActionConfig;
use provider::Provider;

/// Modifier identifier: declared file contents.
pub const METHOD_CONTENT: &str = "minder.content";
/// Modifier identifier: pin workflow action tags to digests.
pub const METHOD_TAG_RESOLVE: &str = "minder.actions.replace_tags_with_sha";
/// Modifier identifier: apply a YAML expression to matched files.
pub const METHOD_YQ_EVALUATE: &str = "minder.yq.evaluate";

/// A pluggable filesystem modification.
#[async_trait]
pub trait FsModifier: Send + Sync {
    /// Compute the intended entries. Purely in-memory; must not touch git
    /// state or the working tree. Implementations that traverse the tree or
    /// call the provider must observe `cancel` and stop early when it fires.
    async fn create_entries(
        &mut self,
        root: &Path,
        scope: &Value,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// The computed entries, in declaration order.
    fn entries(&self) -> &[FsEntry];

    /// Write the computed entries into the working tree; returns the
    /// relative paths written.
    fn modify_fs(&self, root: &Path) -> Result<Vec<PathBuf>> {
        fsentry::write_entries(root, self.entries())
    }

    /// Hex digest identifying the intended contents.
    fn hash(&self) -> String {
        fsentry::content_sha1(self.entries())
    }

    /// Human-readable summary of the intended entries.
    fn write_summary(&self, w: &mut dyn Write) -> io::Result<()> {
        fsentry::write_summary(w, self.entries())
    }
}

impl fmt::Debug for dyn FsModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsModifier").finish()
    }
}

/// Everything a modifier constructor may capture.
pub struct ModifierSpawn<'a> {
    /// PR action configuration from the rule type.
    pub config: &'a PullRequestActionConfig,
    /// Rule definition from the profile.
    pub def: &'a Value,
    /// Per-instance rule parameters.
    pub params: &'a Value,
    /// The provider backing the remediation.
    pub provider: &'a Arc<dyn Provider>,
}

/// Constructor signature stored in the registry.
pub type ModifierFactory = fn(&ModifierSpawn<'_>) -> Result<Box<dyn FsModifier>, FactoryError>;

/// The named factory table.
#[must_use]
pub fn registry() -> HashMap<&'static str, ModifierFactory> {
    let mut table: HashMap<&'static str, ModifierFactory> = HashMap::new();
    table.insert(METHOD_CONTENT, content::ContentModifier::spawn);
    table.insert(METHOD_TAG_RESOLVE, tag_resolve::TagResolveModifier::spawn);
    table.insert(METHOD_YQ_EVALUATE, yaml_expr::YamlExprModifier::spawn);
    table
}

/// Construct the modifier the configuration's method tag selects.
///
/// The tagged config makes an unknown method unrepresentable after parsing;
/// the registry lookup stays as the contract for externally supplied tables.
pub fn new_modifier(spawn: &ModifierSpawn<'_>) -> Result<Box<dyn FsModifier>, FactoryError> {
    let method = spawn.config.modification.method();
    let table = registry();
    let factory = table
        .get(method)
        .ok_or_else(|| FactoryError::UnknownMethod {
            class: "modification",
            method: method.to_string(),
        })?;
    factory(spawn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentConfig, ModificationConfig, TagResolveConfig, YqConfig};
    use serde_json::json;

    struct Bare;
    impl Provider for Bare {
        fn name(&self) -> &str {
            "bare"
        }
    }

    fn config(modification: serde_json::Value) -> PullRequestActionConfig {
        serde_json::from_value(json!({
            "title": "t",
            "body": "b",
            "modification": modification,
        }))
        .unwrap()
    }

    #[test]
    fn content_config_resolves_to_the_content_modifier() {
        let config = config(json!({
            "modification_method": "minder.content",
            "contents": [{"path": "a", "content": "b"}],
        }));
        let def = json!({});
        let params = json!({});
        let prov: Arc<dyn Provider> = Arc::new(Bare);
        let spawn = ModifierSpawn {
            config: &config,
            def: &def,
            params: &params,
            provider: &prov,
        };
        assert!(new_modifier(&spawn).is_ok());
    }

    #[test]
    fn default_config_selects_the_content_method() {
        let config: PullRequestActionConfig =
            serde_json::from_value(json!({"title": "t", "body": "b"})).unwrap();
        assert_eq!(config.modification.method(), METHOD_CONTENT);

        // The default carries no entries, which the factory rejects.
        let def = json!({});
        let params = json!({});
        let prov: Arc<dyn Provider> = Arc::new(Bare);
        let spawn = ModifierSpawn {
            config: &config,
            def: &def,
            params: &params,
            provider: &prov,
        };
        let err = new_modifier(&spawn).unwrap_err();
        assert!(matches!(err, FactoryError::MissingConfig { .. }));
    }

    #[test]
    fn registry_keys_match_config_method_identifiers() {
        let table = registry();
        for modification in [
            ModificationConfig::Content(ContentConfig::default()),
            ModificationConfig::TagResolve(TagResolveConfig::default()),
            ModificationConfig::YqEvaluate(YqConfig {
                expression: ".a = 1".to_string(),
                patterns: Vec::new(),
            }),
        ] {
            assert!(
                table.contains_key(modification.method()),
                "no factory registered for {}",
                modification.method()
            );
        }
        assert_eq!(table.len(), 3);
    }
}
