//! Tag-resolve modifier: rewrite mutable workflow action references to
//! immutable commit digests.
//!
//! Walks `.github/workflows` and replaces `uses: owner/repo@tag` with the
//! digest the tag currently points at, keeping the tag as a trailing
//! comment. References already pinned to a 40-hex digest are left alone, as
//! are local (`./`) and `docker://` references.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FsModifier, ModifierSpawn};
use crate::actions::pull_request::fsentry::{FsEntry, GIT_MODE_FILE};
use crate::errors::FactoryError;
use crate::models::ModificationConfig;
use provider::{cancellable, GitHub, Provider, ProviderError};

/// Repository-local configuration file carrying the exclude list.
const REPO_CONFIG_FILES: [&str; 2] = [".frizbee.yml", ".frizbee.yaml"];

const WORKFLOWS_DIR: &str = ".github/workflows";

#[derive(Debug, Default, Deserialize)]
struct RepoConfig {
    #[serde(default)]
    exclude: Vec<String>,
}

/// Pins workflow action references via the GitHub capability.
pub struct TagResolveModifier {
    provider: Arc<dyn Provider>,
    rule_exclude: Vec<String>,
    config_exclude: Vec<String>,
    entries: Vec<FsEntry>,
}

impl TagResolveModifier {
    /// Registry constructor.
    pub fn spawn(spawn: &ModifierSpawn<'_>) -> Result<Box<dyn FsModifier>, FactoryError> {
        let ModificationConfig::TagResolve(config) = &spawn.config.modification else {
            return Err(FactoryError::MissingConfig {
                class: "modification",
                method: super::METHOD_TAG_RESOLVE,
            });
        };
        if spawn.provider.as_github().is_none() {
            return Err(FactoryError::CapabilityMismatch {
                provider: spawn.provider.name().to_string(),
                capability: "github",
            });
        }
        let rule_exclude = spawn
            .def
            .get("exclude")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Box::new(Self {
            provider: Arc::clone(spawn.provider),
            rule_exclude,
            config_exclude: config.exclude.clone().unwrap_or_default(),
            entries: Vec::new(),
        }))
    }

    /// Exclude list precedence: repo config, then rule definition, then PR
    /// config. First non-empty wins.
    fn resolve_exclude(&self, root: &Path) -> Vec<String> {
        for name in REPO_CONFIG_FILES {
            let path = root.join(name);
            if let Ok(text) = fs::read_to_string(&path) {
                match serde_yaml::from_str::<RepoConfig>(&text) {
                    Ok(config) if !config.exclude.is_empty() => return config.exclude,
                    Ok(_) => {}
                    Err(err) => warn!(file = name, %err, "ignoring unparseable repo config"),
                }
            }
        }
        if !self.rule_exclude.is_empty() {
            return self.rule_exclude.clone();
        }
        self.config_exclude.clone()
    }

    async fn pin_workflow(
        &self,
        github: &dyn GitHub,
        text: &str,
        exclude: &[String],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let uses_re = Regex::new(
            r#"(?m)(?P<prefix>uses\s*:\s*['"]?)(?P<action>[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+)(?P<subpath>/[A-Za-z0-9_./-]+)?@(?P<ref>[A-Za-z0-9_./-]+)"#,
        )
        .context("compiling uses regex")?;
        let hex40 = Regex::new(r"^[0-9a-f]{40}$").context("compiling digest regex")?;

        // Resolve each distinct action@ref once, then rewrite in one pass.
        let mut resolved: HashMap<(String, String), String> = HashMap::new();
        for captures in uses_re.captures_iter(text) {
            let action = &captures["action"];
            let git_ref = &captures["ref"];
            if hex40.is_match(git_ref)
                || action.starts_with("./")
                || action.starts_with("docker:")
                || exclude.iter().any(|e| e == action || e == &format!("{action}@{git_ref}"))
            {
                continue;
            }
            let key = (action.to_string(), git_ref.to_string());
            if resolved.contains_key(&key) {
                continue;
            }
            let Some((owner, repo)) = action.split_once('/') else {
                continue;
            };
            match cancellable(cancel, github.resolve_action_ref(owner, repo, git_ref)).await {
                Ok(sha) => {
                    debug!(action, git_ref, %sha, "pinned workflow action");
                    resolved.insert(key, sha);
                }
                Err(ProviderError::Cancelled) => {
                    anyhow::bail!("cancelled while resolving action refs");
                }
                Err(err) => {
                    warn!(action, git_ref, %err, "could not resolve action ref, leaving unpinned");
                }
            }
        }

        let rewritten = uses_re.replace_all(text, |captures: &regex::Captures<'_>| {
            let action = &captures["action"];
            let git_ref = &captures["ref"];
            let subpath = captures.name("subpath").map_or("", |m| m.as_str());
            match resolved.get(&(action.to_string(), git_ref.to_string())) {
                Some(sha) => format!(
                    "{}{}{}@{} # {}",
                    &captures["prefix"], action, subpath, sha, git_ref
                ),
                None => captures[0].to_string(),
            }
        });
        Ok(rewritten.into_owned())
    }
}

#[async_trait]
impl FsModifier for TagResolveModifier {
    async fn create_entries(
        &mut self,
        root: &Path,
        _scope: &Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(github) = self.provider.as_github() else {
            anyhow::bail!("provider lost GitHub capability");
        };
        let exclude = self.resolve_exclude(root);

        let workflows = root.join(WORKFLOWS_DIR);
        if !workflows.is_dir() {
            return Ok(());
        }

        let mut files: Vec<_> = fs::read_dir(&workflows)
            .context("reading workflows directory")?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
            })
            .collect();
        files.sort();

        let mut entries = Vec::new();
        for path in files {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading workflow {}", path.display()))?;
            let pinned = self.pin_workflow(github, &text, &exclude, cancel).await?;
            if pinned != text {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .context("workflow file name is not UTF-8")?;
                entries.push(FsEntry {
                    path: format!("{WORKFLOWS_DIR}/{name}"),
                    content: pinned,
                    mode: GIT_MODE_FILE.to_string(),
                });
            }
        }
        self.entries = entries;
        Ok(())
    }

    fn entries(&self) -> &[FsEntry] {
        &self.entries
    }
}
