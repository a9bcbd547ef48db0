//! Rule-evaluation and action-dispatch core.
//!
//! Given a profile binding rules to entity types, the engine evaluates each
//! rule's outcome against the previously persisted one and drives two
//! actions per rule — remediation and alerting — through a pluggable action
//! registry: REST calls, GitHub branch-protection patching, content-addressed
//! pull-request remediation, and their alert analogues.
//!
//! The crate is a library; profile storage, YAML parsing, scheduling, and
//! the service surface live with its embedders.

pub mod actions;
pub mod engine;
pub mod errors;
pub mod models;
pub mod statemachine;
pub mod templates;

pub use engine::{ActionOutcome, ActionsError, EvalParams, RuleActions};
pub use errors::{ActionError, ActionTransition, EvaluationError, FactoryError, RestError};
pub use models::{
    ActionSetting, AlertStatus, Entity, EvalStatus, IngestResult, PriorEvaluation, Profile,
    RemediationStatus, Repository, RuleInstance, RuleType,
};
pub use statemachine::ActionCmd;
