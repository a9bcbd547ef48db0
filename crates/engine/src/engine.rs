//! The rule actions engine: owns one remediator and one alerter per rule,
//! gates them on the profile settings, consults the state machine, and
//! aggregates both outcomes.
//!
//! The engine never fails fast across the two action classes; both are
//! always attempted and the caller receives one aggregate to persist.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actions::{new_alerter, new_remediator, Action, ActionContext, ActionResult};
use crate::errors::{ActionError, ActionTransition, EvaluationError, FactoryError};
use crate::models::{
    ActionSetting, AlertStatus, Entity, EvalStatus, IngestResult, PriorEvaluation, Profile,
    RemediationStatus, RuleInstance, RuleType,
};
use crate::statemachine::{alert_command, is_skippable, remediation_command, ActionCmd};
use provider::Provider;

/// The evaluation carrier: everything the engine needs about one
/// `(profile, rule, entity)` evaluation.
#[derive(Debug)]
pub struct EvalParams {
    pub rule: RuleInstance,
    pub prior: PriorEvaluation,
    /// Error reported by the evaluator; `None` means the entity is
    /// compliant.
    pub eval_err: Option<EvaluationError>,
    /// Structured output of the evaluation, available to templates.
    pub eval_output: Option<Value>,
    /// Caller-supplied cancellation token, propagated to every provider
    /// call and tree traversal this evaluation performs.
    pub cancel: CancellationToken,
}

/// Outcome of one action class within a [`RuleActions::do_actions`] run.
#[derive(Debug)]
pub struct ActionOutcome {
    /// Transition on success, taxonomy error otherwise.
    pub status: Result<ActionTransition, ActionError>,
    /// Metadata to persist for the next evaluation.
    pub metadata: Value,
}

impl ActionOutcome {
    fn skipped(metadata: Value) -> Self {
        Self {
            status: Err(ActionError::Skipped),
            metadata,
        }
    }

    /// Fold an action result back onto the metadata invariant: failures and
    /// skips keep the prior metadata; success and pending take the new one.
    fn from_result(result: ActionResult, prev_metadata: &Value) -> Self {
        let keep_new = matches!(result.outcome, Ok(_) | Err(ActionError::Pending));
        let metadata = if keep_new {
            normalize(&result.metadata)
        } else {
            prev_metadata.clone()
        };
        Self {
            status: result.outcome,
            metadata,
        }
    }

    /// Whether the action completed its transition this run.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.is_ok()
    }

    /// The remediation status a caller would persist for this outcome.
    #[must_use]
    pub fn remediation_status(&self) -> RemediationStatus {
        match &self.status {
            Ok(_) => RemediationStatus::Success,
            Err(ActionError::Pending) => RemediationStatus::Pending,
            Err(ActionError::Skipped) => RemediationStatus::Skipped,
            Err(ActionError::NotAvailable) => RemediationStatus::NotAvailable,
            Err(ActionError::Failed { .. }) => RemediationStatus::Failure,
        }
    }

    /// The alert status a caller would persist for this outcome.
    #[must_use]
    pub fn alert_status(&self) -> AlertStatus {
        match &self.status {
            Ok(ActionTransition::TurnedOn) => AlertStatus::On,
            Ok(ActionTransition::TurnedOff) => AlertStatus::Off,
            Err(ActionError::Failed { .. }) => AlertStatus::Error,
            Err(ActionError::NotAvailable) => AlertStatus::NotAvailable,
            Err(ActionError::Skipped | ActionError::Pending) => AlertStatus::Skipped,
        }
    }
}

/// Aggregate of both action outcomes for one evaluation.
#[derive(Debug)]
pub struct ActionsError {
    pub remediate: ActionOutcome,
    pub alert: ActionOutcome,
}

/// Missing or null metadata is persisted as the empty object.
fn normalize(metadata: &Value) -> Value {
    if metadata.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        metadata.clone()
    }
}

/// One remediator and one alerter bound to a rule type, with the profile's
/// on/off settings pre-resolved.
pub struct RuleActions {
    remediator: Box<dyn Action>,
    alerter: Box<dyn Action>,
    remediate_setting: ActionSetting,
    alert_setting: ActionSetting,
}

impl RuleActions {
    /// Build both actions for `rule_type`, validating provider capability
    /// fit up front.
    pub fn new(
        rule_type: &RuleType,
        profile: &Profile,
        provider: &Arc<dyn Provider>,
    ) -> Result<Self, FactoryError> {
        Ok(Self {
            remediator: new_remediator(rule_type, provider)?,
            alerter: new_alerter(rule_type, provider)?,
            remediate_setting: profile.remediate,
            alert_setting: profile.alert,
        })
    }

    /// Dispatch remediation and alert for one evaluation.
    ///
    /// Remediation completes before the alert starts; the alert decision
    /// consumes the remediation outcome.
    pub async fn do_actions(
        &self,
        entity: &Entity,
        params: &EvalParams,
        ingest: Option<&IngestResult>,
    ) -> ActionsError {
        let ctx = ActionContext {
            entity,
            rule: &params.rule,
            eval_output: params.eval_output.as_ref(),
            ingest,
            cancel: &params.cancel,
        };
        let new_eval = EvalStatus::from_eval(params.eval_err.as_ref());

        let remediate = self.run_remediation(&ctx, params, new_eval).await;
        let alert = self
            .run_alert(&ctx, params, new_eval, remediate.succeeded())
            .await;

        ActionsError { remediate, alert }
    }

    async fn run_remediation(
        &self,
        ctx: &ActionContext<'_>,
        params: &EvalParams,
        new_eval: EvalStatus,
    ) -> ActionOutcome {
        let prev_metadata = normalize(&params.prior.rem_metadata);
        if is_skippable(self.remediate_setting, params.eval_err.as_ref()) {
            debug!(rule = %params.rule.name, setting = %self.remediate_setting, "remediation skipped");
            return ActionOutcome::skipped(prev_metadata);
        }

        let cmd = remediation_command(params.prior.remediation(), new_eval);
        debug!(rule = %params.rule.name, %cmd, "remediation decision");
        if cmd == ActionCmd::DoNothing {
            return ActionOutcome::skipped(prev_metadata);
        }

        let result = self
            .remediator
            .do_action(ctx, cmd, self.remediate_setting, &prev_metadata)
            .await;
        ActionOutcome::from_result(result, &prev_metadata)
    }

    async fn run_alert(
        &self,
        ctx: &ActionContext<'_>,
        params: &EvalParams,
        new_eval: EvalStatus,
        remediation_succeeded: bool,
    ) -> ActionOutcome {
        let prev_metadata = normalize(&params.prior.alert_metadata);
        if is_skippable(self.alert_setting, params.eval_err.as_ref()) {
            debug!(rule = %params.rule.name, setting = %self.alert_setting, "alert skipped");
            return ActionOutcome::skipped(prev_metadata);
        }

        let cmd = alert_command(
            params.prior.alert(),
            new_eval,
            remediation_succeeded,
            self.remediator.kind(),
        );
        debug!(rule = %params.rule.name, %cmd, "alert decision");
        if cmd == ActionCmd::DoNothing {
            return ActionOutcome::skipped(prev_metadata);
        }

        let result = self
            .alerter
            .do_action(ctx, cmd, self.alert_setting, &prev_metadata)
            .await;
        ActionOutcome::from_result(result, &prev_metadata)
    }
}
