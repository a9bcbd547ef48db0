//! Core data model: profiles, rule instances and types, entities, and the
//! prior evaluation row the state machine compares against.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EvaluationError;

/// Profile-declared intent for one action class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSetting {
    On,
    Off,
    DryRun,
    Unknown,
}

impl ActionSetting {
    /// Parse a profile knob. The empty string maps to `default`; anything
    /// unrecognized maps to `Unknown` so it is skipped rather than rejected.
    #[must_use]
    pub fn parse(value: &str, default: Self) -> Self {
        match value {
            "" => default,
            "on" => Self::On,
            "off" => Self::Off,
            "dry_run" => Self::DryRun,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ActionSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::DryRun => write!(f, "dry_run"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A user's bundle of rule instances and action knobs.
///
/// Rule parsing and storage are external concerns; the core only needs the
/// name and the two tri-state knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub alert: ActionSetting,
    pub remediate: ActionSetting,
}

impl Profile {
    /// Build a profile from the raw knob strings, applying the documented
    /// defaults (`alert` on, `remediate` off).
    #[must_use]
    pub fn from_knobs(name: &str, alert: &str, remediate: &str) -> Self {
        Self {
            name: name.to_string(),
            alert: ActionSetting::parse(alert, ActionSetting::On),
            remediate: ActionSetting::parse(remediate, ActionSetting::Off),
        }
    }
}

/// One rule bound into a profile. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInstance {
    pub name: String,
    /// Identifier of the rule type this instance is bound to.
    pub rule_type: String,
    /// Rule-specific configuration declared in the profile.
    #[serde(default)]
    pub def: Value,
    /// Per-instance parameters (e.g. the branch name).
    #[serde(default)]
    pub params: Value,
}

/// A rule type: declares how remediation and alerting are carried out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleType {
    pub name: String,
    /// Remediation method, absent for rule types without one.
    #[serde(default)]
    pub remediate: Option<RemediationMethod>,
    /// Alert method, absent for rule types without one.
    #[serde(default)]
    pub alert: Option<AlertMethod>,
}

/// Remediation method configuration, tagged so the parse is exhaustive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum RemediationMethod {
    #[serde(rename = "rest")]
    Rest(RestActionConfig),
    #[serde(rename = "gh_branch_protection")]
    BranchProtection(BranchProtectionActionConfig),
    #[serde(rename = "pull_request")]
    PullRequest(PullRequestActionConfig),
}

/// Alert method configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum AlertMethod {
    #[serde(rename = "rest")]
    Rest(RestActionConfig),
    #[serde(rename = "gh_branch_protection")]
    BranchProtection(BranchProtectionActionConfig),
    #[serde(rename = "security_advisory")]
    SecurityAdvisory(SecurityAdvisoryConfig),
    #[serde(rename = "pull_request_comment")]
    PullRequestComment(PullRequestCommentConfig),
    #[serde(rename = "pull_request_review")]
    PullRequestReview(PullRequestReviewConfig),
}

/// Configuration for REST-call actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestActionConfig {
    /// HTTP method template; defaults to PATCH when absent.
    #[serde(default)]
    pub action_method: Option<String>,
    /// Endpoint template, relative to the provider base URL.
    pub endpoint: String,
    /// Optional JSON body template.
    #[serde(default)]
    pub body: Option<String>,
}

/// Configuration for branch-protection patching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchProtectionActionConfig {
    /// Template producing a JSON-merge-patch fragment.
    pub patch: String,
}

/// Configuration for pull-request remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestActionConfig {
    /// PR title template.
    pub title: String,
    /// PR body template; the magic marker is prepended to the rendered
    /// output.
    pub body: String,
    /// Filesystem modification; absent configuration selects the content
    /// method.
    #[serde(default)]
    pub modification: ModificationConfig,
}

/// Filesystem-modification configuration, tagged by the stable method
/// identifier so the parse is exhaustive: a config naming a method without
/// that method's required fields is rejected at deserialization, not at
/// factory time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "modification_method")]
pub enum ModificationConfig {
    #[serde(rename = "minder.content")]
    Content(ContentConfig),
    #[serde(rename = "minder.actions.replace_tags_with_sha")]
    TagResolve(TagResolveConfig),
    #[serde(rename = "minder.yq.evaluate")]
    YqEvaluate(YqConfig),
}

impl ModificationConfig {
    /// The method identifier this configuration selects, as registered in
    /// the modification factory table.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Content(_) => "minder.content",
            Self::TagResolve(_) => "minder.actions.replace_tags_with_sha",
            Self::YqEvaluate(_) => "minder.yq.evaluate",
        }
    }
}

impl Default for ModificationConfig {
    fn default() -> Self {
        Self::Content(ContentConfig::default())
    }
}

/// Configuration for the content modifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Templated file entries written into the working tree.
    pub contents: Vec<PrContentEntry>,
}

/// Configuration for the tag-resolve modifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagResolveConfig {
    /// Exclude list override; the working-tree config and rule definition
    /// take precedence.
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

/// Configuration for the YAML-expression modifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YqConfig {
    /// Expression template applied to each matched file.
    pub expression: String,
    /// File patterns the expression applies to.
    #[serde(default)]
    pub patterns: Vec<PatternConfig>,
}

/// One declared file entry for the content modifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrContentEntry {
    /// Path template.
    pub path: String,
    /// Content template.
    pub content: String,
    /// Git file mode; defaults to a regular file.
    #[serde(default)]
    pub mode: Option<String>,
}

/// A file pattern consumed by the YAML-expression modifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternConfig {
    pub pattern: String,
    /// Pattern type; only `glob` is supported.
    #[serde(rename = "type", default = "default_pattern_type")]
    pub pattern_type: String,
}

fn default_pattern_type() -> String {
    "glob".to_string()
}

/// Configuration for security-advisory alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityAdvisoryConfig {
    /// Severity recorded in the advisory description.
    #[serde(default)]
    pub severity: Option<String>,
}

/// Configuration for PR-comment alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestCommentConfig {
    /// Comment body template.
    pub review_message: String,
}

/// Configuration for PR-review alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestReviewConfig {
    /// Review body template.
    pub review_message: String,
}

/// An entity a rule evaluates against.
///
/// Internally tagged so templates can interpolate attributes directly
/// (`{{ entity.owner }}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Repository(Repository),
    Artifact(Artifact),
    PullRequest(PullRequestEntity),
    Release(Release),
    PipelineRun(PipelineRun),
}

impl Entity {
    /// The repository view of this entity, if it is one.
    #[must_use]
    pub fn as_repository(&self) -> Option<&Repository> {
        match self {
            Self::Repository(repo) => Some(repo),
            _ => None,
        }
    }

    /// The pull-request view of this entity, if it is one.
    #[must_use]
    pub fn as_pull_request(&self) -> Option<&PullRequestEntity> {
        match self {
            Self::PullRequest(pr) => Some(pr),
            _ => None,
        }
    }
}

/// A repository entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    #[serde(default)]
    pub is_private: bool,
}

/// An artifact entity (container image, package).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub artifact_type: Option<String>,
}

/// A pull-request entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestEntity {
    pub owner: String,
    pub name: String,
    pub number: u64,
    #[serde(default)]
    pub author: Option<String>,
}

/// A release entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub owner: String,
    pub name: String,
    pub tag: String,
}

/// A pipeline, task, or build run entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub run_id: Option<u64>,
}

/// Evaluation status derived from the evaluator's error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStatus {
    Pending,
    Success,
    Failure,
    Error,
    Skipped,
}

impl EvalStatus {
    /// Derive the status from the evaluator outcome.
    #[must_use]
    pub fn from_eval(err: Option<&EvaluationError>) -> Self {
        match err {
            None => Self::Success,
            Some(EvaluationError::Failed(_)) => Self::Failure,
            Some(EvaluationError::Skipped(_) | EvaluationError::SkippedSilently) => Self::Skipped,
            Some(EvaluationError::Pending(_)) => Self::Pending,
            Some(EvaluationError::Other(_)) => Self::Error,
        }
    }
}

/// Persisted remediation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Pending,
    Success,
    Failure,
    Error,
    Skipped,
    NotAvailable,
}

/// Persisted alert status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    On,
    Off,
    Error,
    Skipped,
    NotAvailable,
}

/// The last persisted outcome for a `(profile, rule, entity)` triple.
///
/// Read-only input to the state machine. `None` statuses are invalid or
/// missing rows and collapse to the documented resting states.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriorEvaluation {
    #[serde(default)]
    pub eval_status: Option<EvalStatus>,
    #[serde(default)]
    pub rem_status: Option<RemediationStatus>,
    #[serde(default)]
    pub rem_metadata: Value,
    #[serde(default)]
    pub alert_status: Option<AlertStatus>,
    #[serde(default)]
    pub alert_metadata: Value,
}

impl PriorEvaluation {
    /// Prior remediation status with the missing-row collapse applied.
    #[must_use]
    pub fn remediation(&self) -> RemediationStatus {
        self.rem_status.unwrap_or(RemediationStatus::Skipped)
    }

    /// Prior alert status with the missing-row collapse applied.
    #[must_use]
    pub fn alert(&self) -> AlertStatus {
        self.alert_status.unwrap_or(AlertStatus::Skipped)
    }
}

/// The ingested working tree consumed by the pull-request remediator.
///
/// `root` is a checked-out git working tree; the repository is opened from
/// it on demand and is exclusively owned by one remediator invocation.
#[derive(Debug)]
pub struct IngestResult {
    /// The evaluator's view of the entity state.
    pub object: Value,
    /// Root of the working tree.
    pub root: PathBuf,
    /// Opaque resume point belonging to the ingester.
    pub checkpoint: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_setting_parses_knobs() {
        assert_eq!(ActionSetting::parse("on", ActionSetting::Off), ActionSetting::On);
        assert_eq!(ActionSetting::parse("off", ActionSetting::On), ActionSetting::Off);
        assert_eq!(ActionSetting::parse("dry_run", ActionSetting::Off), ActionSetting::DryRun);
        assert_eq!(ActionSetting::parse("", ActionSetting::On), ActionSetting::On);
        assert_eq!(ActionSetting::parse("", ActionSetting::Off), ActionSetting::Off);
        assert_eq!(ActionSetting::parse("banana", ActionSetting::On), ActionSetting::Unknown);
    }

    #[test]
    fn profile_knob_defaults() {
        let profile = Profile::from_knobs("default", "", "");
        assert_eq!(profile.alert, ActionSetting::On);
        assert_eq!(profile.remediate, ActionSetting::Off);
    }

    #[test]
    fn remediation_method_parse_is_exhaustive() {
        let parsed: RemediationMethod = serde_json::from_value(json!({
            "method": "rest",
            "endpoint": "/repos/{{entity.owner}}/{{entity.name}}/actions/permissions",
        }))
        .unwrap();
        assert!(matches!(parsed, RemediationMethod::Rest(_)));

        let unknown = serde_json::from_value::<RemediationMethod>(json!({
            "method": "carrier_pigeon",
            "endpoint": "/x",
        }));
        assert!(unknown.is_err());
    }

    #[test]
    fn yq_modification_without_expression_fails_to_parse() {
        let parsed = serde_json::from_value::<PullRequestActionConfig>(json!({
            "title": "t",
            "body": "b",
            "modification": {
                "modification_method": "minder.yq.evaluate",
                "patterns": [{"pattern": ".github/workflows/*.yml"}],
            },
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn modification_parse_is_exhaustive() {
        // Content declared without its entries is rejected.
        let parsed = serde_json::from_value::<PullRequestActionConfig>(json!({
            "title": "t",
            "body": "b",
            "modification": {"modification_method": "minder.content"},
        }));
        assert!(parsed.is_err());

        // Unknown method identifiers are rejected.
        let parsed = serde_json::from_value::<PullRequestActionConfig>(json!({
            "title": "t",
            "body": "b",
            "modification": {"modification_method": "minder.carrier_pigeon"},
        }));
        assert!(parsed.is_err());

        // A complete yq config parses.
        let parsed: PullRequestActionConfig = serde_json::from_value(json!({
            "title": "t",
            "body": "b",
            "modification": {
                "modification_method": "minder.yq.evaluate",
                "expression": ".a = 1",
                "patterns": [{"pattern": "*.yml"}],
            },
        }))
        .unwrap();
        assert!(matches!(parsed.modification, ModificationConfig::YqEvaluate(_)));
        assert_eq!(parsed.modification.method(), "minder.yq.evaluate");
    }

    #[test]
    fn absent_modification_defaults_to_content() {
        let parsed: PullRequestActionConfig =
            serde_json::from_value(json!({"title": "t", "body": "b"})).unwrap();
        assert!(matches!(parsed.modification, ModificationConfig::Content(_)));
        assert_eq!(parsed.modification.method(), "minder.content");
    }

    #[test]
    fn entity_serializes_for_template_scope() {
        let entity = Entity::Repository(Repository {
            owner: "stacklok".to_string(),
            name: "minder".to_string(),
            default_branch: "main".to_string(),
            is_private: false,
        });
        let value = serde_json::to_value(&entity).unwrap();
        assert_eq!(value["type"], "repository");
        assert_eq!(value["owner"], "stacklok");
        assert_eq!(value["default_branch"], "main");
    }

    #[test]
    fn prior_row_collapses_missing_statuses() {
        let prior = PriorEvaluation::default();
        assert_eq!(prior.remediation(), RemediationStatus::Skipped);
        assert_eq!(prior.alert(), AlertStatus::Skipped);
    }

    #[test]
    fn eval_status_derivation() {
        assert_eq!(EvalStatus::from_eval(None), EvalStatus::Success);
        assert_eq!(
            EvalStatus::from_eval(Some(&EvaluationError::Failed("drift".into()))),
            EvalStatus::Failure
        );
        assert_eq!(
            EvalStatus::from_eval(Some(&EvaluationError::SkippedSilently)),
            EvalStatus::Skipped
        );
        assert_eq!(
            EvalStatus::from_eval(Some(&EvaluationError::Pending("ingest".into()))),
            EvalStatus::Pending
        );
        assert_eq!(
            EvalStatus::from_eval(Some(&EvaluationError::Other("boom".into()))),
            EvalStatus::Error
        );
    }
}
