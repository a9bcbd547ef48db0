//! The pluggable action registry.
//!
//! An *action* is a side-effectful consequence of a rule evaluation: either a
//! remediation or an alert. All engines sit behind the [`Action`] trait and
//! are picked by the factory from the rule type's method tag, validating the
//! provider capability fit at construction time.

pub mod alert;
pub mod branch_protection;
pub mod noop;
pub mod pull_request;
pub mod rest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{ActionError, ActionTransition, FactoryError};
use crate::models::{
    ActionSetting, AlertMethod, Entity, IngestResult, RemediationMethod, RuleInstance, RuleType,
};
use crate::statemachine::ActionCmd;
use provider::Provider;

/// Which of the two consequences an engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    Remediate,
    Alert,
}

impl std::fmt::Display for ActionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remediate => write!(f, "remediate"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

/// Everything an action invocation may read.
///
/// The ingest result is only populated for entity types the ingester
/// materializes a working tree for; the PR remediator requires it.
pub struct ActionContext<'a> {
    pub entity: &'a Entity,
    pub rule: &'a RuleInstance,
    pub eval_output: Option<&'a Value>,
    pub ingest: Option<&'a IngestResult>,
    /// Caller-supplied cancellation token. Every provider call runs under
    /// it, so in-flight I/O aborts at the next request boundary when it
    /// fires.
    pub cancel: &'a CancellationToken,
}

/// What one action invocation produced.
///
/// The metadata travels separately from the disposition so that pending
/// work (an opened PR) can persist state while still reporting a non-final
/// outcome.
#[derive(Debug)]
pub struct ActionResult {
    pub metadata: Value,
    pub outcome: Result<ActionTransition, ActionError>,
}

impl ActionResult {
    /// The action took effect.
    #[must_use]
    pub fn turned_on(metadata: Value) -> Self {
        Self {
            metadata,
            outcome: Ok(ActionTransition::TurnedOn),
        }
    }

    /// The action was withdrawn.
    #[must_use]
    pub fn turned_off(metadata: Value) -> Self {
        Self {
            metadata,
            outcome: Ok(ActionTransition::TurnedOff),
        }
    }

    /// Asynchronous work started; `metadata` is the resume point.
    #[must_use]
    pub fn pending(metadata: Value) -> Self {
        Self {
            metadata,
            outcome: Err(ActionError::Pending),
        }
    }

    /// Nothing was done; prior metadata flows through unchanged.
    #[must_use]
    pub fn skipped(prev_metadata: &Value) -> Self {
        Self {
            metadata: prev_metadata.clone(),
            outcome: Err(ActionError::Skipped),
        }
    }

    /// No engine is available for this action class.
    #[must_use]
    pub fn not_available(prev_metadata: &Value) -> Self {
        Self {
            metadata: prev_metadata.clone(),
            outcome: Err(ActionError::NotAvailable),
        }
    }

    /// The action failed; prior metadata flows through unchanged.
    #[must_use]
    pub fn failed(prev_metadata: &Value, err: ActionError) -> Self {
        Self {
            metadata: prev_metadata.clone(),
            outcome: Err(err),
        }
    }
}

/// One remediation or alert engine bound to a rule type.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable subtype string (`rest`, `pull_request`, ...) used for error
    /// annotation and the PR-alert coupling rule.
    fn kind(&self) -> &'static str;

    /// Which consequence this engine drives.
    fn class(&self) -> ActionClass;

    /// Carry out `cmd` under `setting`.
    ///
    /// `prev_metadata` is the metadata persisted by the last invocation for
    /// this `(profile, rule, entity)` triple; implementations must hand it
    /// back unchanged unless they succeed or go pending.
    async fn do_action(
        &self,
        ctx: &ActionContext<'_>,
        cmd: ActionCmd,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult;
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("kind", &self.kind()).finish()
    }
}

fn require_rest(provider: &Arc<dyn Provider>) -> Result<(), FactoryError> {
    if provider.as_rest().is_some() {
        Ok(())
    } else {
        Err(FactoryError::CapabilityMismatch {
            provider: provider.name().to_string(),
            capability: "rest",
        })
    }
}

fn require_github(provider: &Arc<dyn Provider>) -> Result<(), FactoryError> {
    if provider.as_github().is_some() {
        Ok(())
    } else {
        Err(FactoryError::CapabilityMismatch {
            provider: provider.name().to_string(),
            capability: "github",
        })
    }
}

/// Build the remediation engine for a rule type.
///
/// A rule type without a remediation block gets the noop engine, which
/// reports "not available" on every invocation.
pub fn new_remediator(
    rule_type: &RuleType,
    provider: &Arc<dyn Provider>,
) -> Result<Box<dyn Action>, FactoryError> {
    match &rule_type.remediate {
        None => Ok(Box::new(noop::NoopAction::new(ActionClass::Remediate))),
        Some(RemediationMethod::Rest(config)) => {
            require_rest(provider)?;
            Ok(Box::new(rest::RestAction::new(
                ActionClass::Remediate,
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(RemediationMethod::BranchProtection(config)) => {
            require_github(provider)?;
            Ok(Box::new(branch_protection::BranchProtectionAction::new(
                ActionClass::Remediate,
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(RemediationMethod::PullRequest(config)) => {
            require_github(provider)?;
            Ok(Box::new(pull_request::PullRequestAction::new(
                config.clone(),
                Arc::clone(provider),
            )))
        }
    }
}

/// Build the alert engine for a rule type.
pub fn new_alerter(
    rule_type: &RuleType,
    provider: &Arc<dyn Provider>,
) -> Result<Box<dyn Action>, FactoryError> {
    match &rule_type.alert {
        None => Ok(Box::new(noop::NoopAction::new(ActionClass::Alert))),
        Some(AlertMethod::Rest(config)) => {
            require_rest(provider)?;
            Ok(Box::new(rest::RestAction::new(
                ActionClass::Alert,
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(AlertMethod::BranchProtection(config)) => {
            require_github(provider)?;
            Ok(Box::new(branch_protection::BranchProtectionAction::new(
                ActionClass::Alert,
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(AlertMethod::SecurityAdvisory(config)) => {
            require_github(provider)?;
            Ok(Box::new(alert::security_advisory::SecurityAdvisoryAlert::new(
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(AlertMethod::PullRequestComment(config)) => {
            require_github(provider)?;
            Ok(Box::new(alert::pr_comment::PullRequestCommentAlert::new(
                config.clone(),
                Arc::clone(provider),
            )))
        }
        Some(AlertMethod::PullRequestReview(config)) => {
            require_github(provider)?;
            Ok(Box::new(alert::pr_review::PullRequestReviewAlert::new(
                config.clone(),
                Arc::clone(provider),
            )))
        }
    }
}
