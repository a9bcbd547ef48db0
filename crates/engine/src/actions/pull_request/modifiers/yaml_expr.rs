//! YAML-expression modifier: apply a small yq-style expression to every
//! glob-matched file in the working tree.
//!
//! The expression language is the subset profiles actually use: path
//! assignments (`.jobs.build.permissions = {"contents": "read"}`) and
//! deletions (`del(.jobs.build.continue-on-error)`), with `[n]` index steps
//! and `|`-separated statements. The expression itself is template-expanded
//! against the action scope before parsing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use glob::Pattern;
use serde_json::Value;
use serde_yaml::Value as Yaml;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{FsModifier, ModifierSpawn};
use crate::actions::pull_request::fsentry::{FsEntry, GIT_MODE_FILE};
use crate::errors::FactoryError;
use crate::models::{ModificationConfig, PatternConfig};
use crate::templates::{render_bounded, MAX_BODY_BYTES};

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

/// One parsed statement.
#[derive(Debug, Clone)]
enum Statement {
    Assign(Vec<Step>, Yaml),
    Delete(Vec<Step>),
}

/// Applies a YAML expression to matched files.
pub struct YamlExprModifier {
    expression: String,
    patterns: Vec<PatternConfig>,
    entries: Vec<FsEntry>,
}

impl YamlExprModifier {
    /// Registry constructor. The tagged config guarantees the expression is
    /// present once parsing succeeded.
    pub fn spawn(spawn: &ModifierSpawn<'_>) -> Result<Box<dyn FsModifier>, FactoryError> {
        let ModificationConfig::YqEvaluate(config) = &spawn.config.modification else {
            return Err(FactoryError::MissingConfig {
                class: "modification",
                method: super::METHOD_YQ_EVALUATE,
            });
        };
        Ok(Box::new(Self {
            expression: config.expression.clone(),
            patterns: config.patterns.clone(),
            entries: Vec::new(),
        }))
    }
}

fn parse_path(input: &str) -> Result<Vec<Step>> {
    let mut rest = input.trim();
    ensure!(rest.starts_with('.'), "path must start with '.': {input}");
    let mut steps = Vec::new();
    while !rest.is_empty() {
        if let Some(after_dot) = rest.strip_prefix('.') {
            if let Some(quoted) = after_dot.strip_prefix('"') {
                let end = quoted.find('"').context("unterminated quoted key")?;
                steps.push(Step::Key(quoted[..end].to_string()));
                rest = &quoted[end + 1..];
            } else {
                let end = after_dot
                    .find(|c: char| c == '.' || c == '[')
                    .unwrap_or(after_dot.len());
                ensure!(end > 0, "empty path segment in {input}");
                steps.push(Step::Key(after_dot[..end].to_string()));
                rest = &after_dot[end..];
            }
        } else if let Some(after_bracket) = rest.strip_prefix('[') {
            let end = after_bracket.find(']').context("unterminated index")?;
            let index = after_bracket[..end]
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid index in {input}"))?;
            steps.push(Step::Index(index));
            rest = &after_bracket[end + 1..];
        } else {
            bail!("unexpected character in path: {rest}");
        }
    }
    Ok(steps)
}

fn parse_statements(expression: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for raw in expression.split('|') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if let Some(inner) = raw.strip_prefix("del(").and_then(|r| r.strip_suffix(')')) {
            statements.push(Statement::Delete(parse_path(inner)?));
        } else if let Some((path, value)) = raw.split_once('=') {
            let json: Value = serde_json::from_str(value.trim())
                .with_context(|| format!("assignment value is not JSON: {value}"))?;
            statements.push(Statement::Assign(
                parse_path(path)?,
                serde_yaml::to_value(&json).context("converting assignment value")?,
            ));
        } else {
            bail!("unsupported statement: {raw}");
        }
    }
    ensure!(!statements.is_empty(), "expression has no statements");
    Ok(statements)
}

fn assign(doc: &mut Yaml, steps: &[Step], value: Yaml) -> Result<()> {
    let Some((last, parents)) = steps.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut current = doc;
    for step in parents {
        current = descend(current, step, true)?;
    }
    match last {
        Step::Key(key) => {
            if !current.is_mapping() {
                *current = Yaml::Mapping(serde_yaml::Mapping::new());
            }
            if let Yaml::Mapping(map) = current {
                map.insert(Yaml::String(key.clone()), value);
            }
        }
        Step::Index(index) => {
            let Yaml::Sequence(seq) = current else {
                bail!("cannot index into non-sequence at [{index}]");
            };
            ensure!(*index <= seq.len(), "index {index} out of bounds");
            if *index == seq.len() {
                seq.push(value);
            } else {
                seq[*index] = value;
            }
        }
    }
    Ok(())
}

fn descend<'a>(current: &'a mut Yaml, step: &Step, create: bool) -> Result<&'a mut Yaml> {
    match step {
        Step::Key(key) => {
            if !current.is_mapping() && create {
                *current = Yaml::Mapping(serde_yaml::Mapping::new());
            }
            let Yaml::Mapping(map) = current else {
                bail!("cannot descend into non-mapping at .{key}");
            };
            let key = Yaml::String(key.clone());
            if !map.contains_key(&key) {
                ensure!(create, "missing key {key:?}");
                map.insert(key.clone(), Yaml::Null);
            }
            map.get_mut(&key).context("key vanished during descent")
        }
        Step::Index(index) => {
            let Yaml::Sequence(seq) = current else {
                bail!("cannot index into non-sequence at [{index}]");
            };
            seq.get_mut(*index)
                .with_context(|| format!("index {index} out of bounds"))
        }
    }
}

fn delete(doc: &mut Yaml, steps: &[Step]) -> Result<()> {
    let Some((last, parents)) = steps.split_last() else {
        return Ok(());
    };

    let mut current = doc;
    for step in parents {
        match descend(current, step, false) {
            Ok(next) => current = next,
            // Deleting a path that does not exist is a no-op.
            Err(_) => return Ok(()),
        }
    }
    match last {
        Step::Key(key) => {
            if let Yaml::Mapping(map) = current {
                map.remove(&Yaml::String(key.clone()));
            }
        }
        Step::Index(index) => {
            if let Yaml::Sequence(seq) = current {
                if *index < seq.len() {
                    seq.remove(*index);
                }
            }
        }
    }
    Ok(())
}

fn apply(doc: &mut Yaml, statements: &[Statement]) -> Result<()> {
    for statement in statements {
        match statement {
            Statement::Assign(steps, value) => assign(doc, steps, value.clone())?,
            Statement::Delete(steps) => delete(doc, steps)?,
        }
    }
    Ok(())
}

/// Collect regular files under `root` (relative paths, sorted, `.git`
/// excluded). Entry order feeds the content hash, so it must be stable.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
            let path = entry?.path();
            if path.is_dir() {
                if path.file_name().is_some_and(|n| n == ".git") {
                    continue;
                }
                walk(root, &path, out)?;
            } else if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

#[async_trait]
impl FsModifier for YamlExprModifier {
    async fn create_entries(
        &mut self,
        root: &Path,
        scope: &Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let expression = render_bounded(&self.expression, scope, MAX_BODY_BYTES)?;
        let statements = parse_statements(&expression)?;
        let files = collect_files(root)?;

        let mut entries = Vec::new();
        for pattern_config in &self.patterns {
            if pattern_config.pattern_type != "glob" {
                warn!(
                    pattern_type = %pattern_config.pattern_type,
                    pattern = %pattern_config.pattern,
                    "unsupported pattern type, skipping"
                );
                continue;
            }
            let pattern = Pattern::new(&pattern_config.pattern)
                .with_context(|| format!("invalid glob pattern {}", pattern_config.pattern))?;

            for relative in &files {
                // Large trees take a while; stop between file matches once
                // the invocation is cancelled.
                if cancel.is_cancelled() {
                    bail!("cancelled while matching files");
                }
                if !pattern.matches_path(relative) {
                    continue;
                }
                let text = fs::read_to_string(root.join(relative))
                    .with_context(|| format!("reading {}", relative.display()))?;
                let mut doc: Yaml = serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing {}", relative.display()))?;
                apply(&mut doc, &statements)?;
                let output =
                    serde_yaml::to_string(&doc).context("serializing transformed document")?;
                let path = relative
                    .to_str()
                    .context("matched path is not UTF-8")?
                    .to_string();
                entries.push(FsEntry {
                    path,
                    content: output,
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_assignment_and_deletion() {
        let statements =
            parse_statements(r#".jobs.build.permissions = {"contents": "read"} | del(.jobs.build.continue-on-error)"#)
                .unwrap();
        assert_eq!(statements.len(), 2);
        assert!(matches!(&statements[0], Statement::Assign(steps, _) if steps.len() == 3));
        assert!(matches!(&statements[1], Statement::Delete(steps) if steps.len() == 3));
    }

    #[test]
    fn parses_indexed_and_quoted_paths() {
        let steps = parse_path(r#".jobs."build-all".steps[0].uses"#).unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Key("jobs".to_string()),
                Step::Key("build-all".to_string()),
                Step::Key("steps".to_string()),
                Step::Index(0),
                Step::Key("uses".to_string()),
            ]
        );
    }

    #[test]
    fn apply_assigns_creating_missing_mappings() {
        let mut doc: Yaml = serde_yaml::from_str("jobs:\n  build:\n    runs-on: ubuntu\n").unwrap();
        let statements =
            parse_statements(r#".jobs.build.permissions = {"contents": "read"}"#).unwrap();
        apply(&mut doc, &statements).unwrap();
        let out = serde_yaml::to_string(&doc).unwrap();
        assert!(out.contains("permissions:"));
        assert!(out.contains("contents: read"));
        assert!(out.contains("runs-on: ubuntu"));
    }

    #[test]
    fn apply_deletes_missing_paths_silently() {
        let mut doc: Yaml = serde_yaml::from_str("a: 1\n").unwrap();
        let statements = parse_statements("del(.b.c)").unwrap();
        apply(&mut doc, &statements).unwrap();
        assert_eq!(serde_yaml::to_string(&doc).unwrap(), "a: 1\n");
    }

    #[tokio::test]
    async fn matches_globs_and_records_transformed_output() {
        let dir = tempfile::tempdir().unwrap();
        let workflows = dir.path().join(".github/workflows");
        fs::create_dir_all(&workflows).unwrap();
        fs::write(workflows.join("ci.yml"), "jobs:\n  build:\n    runs-on: ubuntu\n").unwrap();
        fs::write(dir.path().join("README.md"), "not yaml\n").unwrap();

        let mut modifier = YamlExprModifier {
            expression: r#".jobs.build.timeout-minutes = {{profile.timeout}}"#.to_string(),
            patterns: vec![PatternConfig {
                pattern: ".github/workflows/*.yml".to_string(),
                pattern_type: "glob".to_string(),
            }],
            entries: Vec::new(),
        };
        modifier
            .create_entries(
                dir.path(),
                &json!({"profile": {"timeout": 30}}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let entries = modifier.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, ".github/workflows/ci.yml");
        assert!(entries[0].content.contains("timeout-minutes: 30"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_between_file_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.yml"), "a: 1\n").unwrap();

        let mut modifier = YamlExprModifier {
            expression: ".a = 2".to_string(),
            patterns: vec![PatternConfig {
                pattern: "*.yml".to_string(),
                pattern_type: "glob".to_string(),
            }],
            entries: Vec::new(),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = modifier
            .create_entries(dir.path(), &json!({}), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(modifier.entries().is_empty());
    }

    #[tokio::test]
    async fn unsupported_pattern_type_warns_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.yml"), "a: 1\n").unwrap();

        let mut modifier = YamlExprModifier {
            expression: ".a = 2".to_string(),
            patterns: vec![PatternConfig {
                pattern: "x.yml".to_string(),
                pattern_type: "regex".to_string(),
            }],
            entries: Vec::new(),
        };
        modifier
            .create_entries(dir.path(), &json!({}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(modifier.entries().is_empty());
    }
}
