//! Error taxonomies for evaluation and action dispatch.
//!
//! Evaluation errors are inputs to the state machine, produced by the
//! external evaluator. Action errors are terminal dispositions of one action
//! invocation; the engine never fails fast across the two action classes, so
//! these travel inside the aggregate result rather than aborting it.

use thiserror::Error;

/// Outcome reported by the external rule evaluator.
///
/// The absence of an error means the evaluation succeeded; every other
/// outcome is one of these variants.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    /// The rule evaluated and the entity is out of compliance.
    #[error("evaluation failure: {0}")]
    Failed(String),

    /// The evaluation was skipped for this entity.
    #[error("evaluation skipped: {0}")]
    Skipped(String),

    /// Skipped, and not worth surfacing to the user.
    #[error("evaluation skipped silently")]
    SkippedSilently,

    /// The evaluation is waiting on external state.
    #[error("evaluation pending: {0}")]
    Pending(String),

    /// The evaluator itself failed.
    #[error("evaluation error: {0}")]
    Other(String),
}

/// Successful transition signaled by an action, kept for the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTransition {
    /// The consequence is now in effect (PR opened, alert raised, patch
    /// applied).
    TurnedOn,
    /// The consequence was withdrawn (PR closed, alert resolved).
    TurnedOff,
}

/// Terminal disposition of one action invocation.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The rule type declares no engine for this action class.
    #[error("action not available")]
    NotAvailable,

    /// The action intentionally did nothing (off, unknown, gated, or a
    /// turn-off with no prior state).
    #[error("action skipped")]
    Skipped,

    /// The action started asynchronous work; the next evaluation resumes
    /// from the stored metadata.
    #[error("action pending")]
    Pending,

    /// A recoverable failure, annotated with the action subtype so callers
    /// can log taxonomy plus subtype.
    #[error("{subtype} action failed: {source}")]
    Failed {
        subtype: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ActionError {
    /// Wrap an internal error as a failure of the given action subtype.
    pub fn failed(subtype: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Failed {
            subtype,
            source: source.into(),
        }
    }
}

/// HTTP status translated onto the action error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RestError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("client error: status {0}")]
    Client(u16),
    #[error("server error: status {0}")]
    Server(u16),
}

impl RestError {
    /// Map an HTTP status code; 2xx maps to `None`.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            400..=499 => Some(Self::Client(status)),
            _ => Some(Self::Server(status)),
        }
    }
}

/// Errors raised while assembling actions for a rule type.
///
/// These are configuration problems caught at construction time; they never
/// surface from a running action.
#[derive(Debug, Error)]
pub enum FactoryError {
    /// The provider lacks the capability the method needs.
    #[error("provider {provider} does not support {capability}")]
    CapabilityMismatch {
        provider: String,
        capability: &'static str,
    },

    /// The method tag is not registered.
    #[error("unknown {class} method: {method}")]
    UnknownMethod { class: &'static str, method: String },

    /// The method is known but its configuration block is incomplete.
    #[error("missing configuration for {class} method {method}")]
    MissingConfig {
        class: &'static str,
        method: &'static str,
    },
}

/// Errors raised while rendering user-authored templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template engine rejected the template or its data.
    #[error("template render failed: {0}")]
    Render(#[from] Box<handlebars::RenderError>),

    /// The rendered output exceeded its byte budget.
    #[error("template output exceeds {limit} bytes")]
    TooLarge { limit: usize },
}
