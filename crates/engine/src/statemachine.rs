//! The action state machine.
//!
//! Given the prior persisted statuses and the current evaluation outcome,
//! decide for each action class whether to turn it on, turn it off, or leave
//! it alone. Both decision functions are pure and total; the engine calls
//! them once per action per evaluation.
//!
//! The remediation table encodes the loop-breaker invariant: a remediation
//! fires only from the `skipped` resting state, and only on a failing
//! evaluation. Once it has entered any other state (pending, success,
//! error), an external transition back to `skipped` is required before it
//! can fire again.

use crate::errors::EvaluationError;
use crate::models::{ActionSetting, AlertStatus, EvalStatus, RemediationStatus};

/// The verb emitted by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCmd {
    TurnOn,
    TurnOff,
    DoNothing,
}

impl std::fmt::Display for ActionCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TurnOn => write!(f, "turn_on"),
            Self::TurnOff => write!(f, "turn_off"),
            Self::DoNothing => write!(f, "do_nothing"),
        }
    }
}

/// Remediation method tag whose fix is not instant: the drift is gone only
/// once the opened PR merges.
pub const KIND_PULL_REQUEST: &str = "pull_request";

/// Decide the remediation command.
#[must_use]
pub fn remediation_command(prev_rem: RemediationStatus, new_eval: EvalStatus) -> ActionCmd {
    let resting = prev_rem == RemediationStatus::Skipped;
    match new_eval {
        // Evaluation flipped away from failure: cancel an armed remediation.
        EvalStatus::Success | EvalStatus::Error => {
            if resting {
                ActionCmd::DoNothing
            } else {
                ActionCmd::TurnOff
            }
        }
        // Only fire from the resting state.
        EvalStatus::Failure => {
            if resting {
                ActionCmd::TurnOn
            } else {
                ActionCmd::DoNothing
            }
        }
        EvalStatus::Skipped | EvalStatus::Pending => ActionCmd::DoNothing,
    }
}

/// Decide the alert command.
///
/// `remediation_succeeded` is the outcome of the remediation dispatched just
/// before in the same evaluation; `remediation_kind` is its method tag. An
/// instant remediation that succeeded suppresses the alert — the fix itself
/// is the surfacing. PR remediations are not instant, so their alerts stay
/// live while the PR is open.
#[must_use]
pub fn alert_command(
    prev_alert: AlertStatus,
    new_eval: EvalStatus,
    remediation_succeeded: bool,
    remediation_kind: &str,
) -> ActionCmd {
    if remediation_kind != KIND_PULL_REQUEST && remediation_succeeded {
        return if prev_alert == AlertStatus::On {
            ActionCmd::TurnOff
        } else {
            ActionCmd::DoNothing
        };
    }

    let latched = prev_alert == AlertStatus::On;
    match new_eval {
        EvalStatus::Failure | EvalStatus::Error => {
            if latched {
                ActionCmd::DoNothing
            } else {
                ActionCmd::TurnOn
            }
        }
        EvalStatus::Success => {
            if latched {
                ActionCmd::TurnOff
            } else {
                ActionCmd::DoNothing
            }
        }
        EvalStatus::Skipped | EvalStatus::Pending => ActionCmd::DoNothing,
    }
}

/// The skippability gate consulted before the state machine.
///
/// `off` and `unknown` settings skip the action outright; `on` and `dry_run`
/// proceed unless the evaluation itself was skipped.
#[must_use]
pub fn is_skippable(setting: ActionSetting, eval_err: Option<&EvaluationError>) -> bool {
    match setting {
        ActionSetting::Off | ActionSetting::Unknown => true,
        ActionSetting::On | ActionSetting::DryRun => matches!(
            eval_err,
            Some(EvaluationError::Skipped(_) | EvaluationError::SkippedSilently)
        ),
    }
}
