//! Provider capability abstraction.
//!
//! Actions never talk to a concrete backend directly; they hold a
//! [`Provider`] and downcast it to the capability they need at construction
//! time. A capability miss is a typed error surfaced by the action factory,
//! never a runtime panic.

pub mod curl;
pub mod github;
pub mod rest;

pub use github::{
    BranchProtection, BranchProtectionUpdate, GitCredentials, GitHub, GitHubClient, PullRequest,
    RequiredPullRequestReviewsUpdate, RequiredStatusChecksUpdate, RestrictionsUpdate, StatusCheck,
    User,
};
pub use rest::{Rest, RestClient, RestResponse};
pub use tokio_util::sync::CancellationToken;

use std::future::Future;

use thiserror::Error;

/// Errors surfaced by provider clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level HTTP failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The target resource does not exist (HTTP 404).
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Client construction or configuration problem.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The invocation's cancellation token fired before the call completed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Await a provider call, aborting at the request boundary when `cancel`
/// fires.
///
/// Dropping the in-flight future aborts the underlying request, so a
/// cancelled invocation never leaves work running in the background.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = call => result,
    }
}

/// Capability set exposed by a provider.
///
/// Each accessor returns `None` when the provider does not implement the
/// capability; callers decide whether that is an error.
pub trait Provider: Send + Sync {
    /// Human-readable provider name, used in logs and error annotations.
    fn name(&self) -> &str;

    /// REST capability: raw request dispatch against the provider's API.
    fn as_rest(&self) -> Option<&dyn Rest> {
        None
    }

    /// GitHub capability: pull requests, branch protection, advisories.
    fn as_github(&self) -> Option<&dyn GitHub> {
        None
    }
}
