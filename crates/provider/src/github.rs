//! GitHub capability and its REST API client.
//!
//! The client is a thin typed layer over the GitHub v3 API: pull requests,
//! branch protection, repository security advisories, review plumbing, and
//! tag-to-digest resolution for workflow pinning. The base URL is
//! overridable so tests can point it at a local mock server.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::rest::{Rest, RestResponse};
use crate::{Provider, ProviderError};

/// GitHub API endpoint.
const GITHUB_API_URL: &str = "https://api.github.com";

/// Credentials handed to git transports when pushing remediation branches.
#[derive(Debug, Clone)]
pub struct GitCredentials {
    /// Username presented to the transport (`x-access-token` for app tokens).
    pub username: String,
    /// Token or password.
    pub password: String,
}

/// The authenticated user behind the provider token.
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    /// User login.
    pub login: String,
    /// Display name, if set.
    #[serde(default)]
    pub name: Option<String>,
    /// Primary email, if visible to the token.
    #[serde(default)]
    pub email: Option<String>,
}

/// A pull request as returned by the list/create endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// PR title.
    pub title: String,
    /// PR body/description.
    #[serde(default)]
    pub body: Option<String>,
    /// PR state (open, closed).
    pub state: String,
    /// Source branch.
    pub head: GitRef,
    /// Target branch.
    pub base: GitRef,
    /// PR HTML URL.
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Git reference (branch) on a PR.
#[derive(Debug, Clone, Deserialize)]
pub struct GitRef {
    /// Branch name.
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit SHA.
    #[serde(default)]
    pub sha: Option<String>,
}

/// Branch protection as the API *returns* it.
///
/// This is the response shape: booleans arrive wrapped in `{ enabled }`
/// objects and restriction actors arrive as full user/team/app records. It is
/// asymmetric with [`BranchProtectionUpdate`], which is what the PUT endpoint
/// accepts; canonicalization between the two lives with the caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchProtection {
    #[serde(default)]
    pub required_status_checks: Option<RequiredStatusChecksView>,
    #[serde(default)]
    pub enforce_admins: Option<EnabledFlag>,
    #[serde(default)]
    pub required_pull_request_reviews: Option<RequiredPullRequestReviewsView>,
    #[serde(default)]
    pub restrictions: Option<RestrictionsView>,
    #[serde(default)]
    pub required_linear_history: Option<EnabledFlag>,
    #[serde(default)]
    pub allow_force_pushes: Option<EnabledFlag>,
    #[serde(default)]
    pub allow_deletions: Option<EnabledFlag>,
    #[serde(default)]
    pub block_creations: Option<EnabledFlag>,
    #[serde(default)]
    pub required_conversation_resolution: Option<EnabledFlag>,
    #[serde(default)]
    pub lock_branch: Option<EnabledFlag>,
    #[serde(default)]
    pub allow_fork_syncing: Option<EnabledFlag>,
}

/// `{ "enabled": bool }` wrapper used throughout the protection response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EnabledFlag {
    pub enabled: bool,
}

/// Required status checks as returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequiredStatusChecksView {
    #[serde(default)]
    pub strict: bool,
    /// Deprecated but still populated by the server alongside `checks`.
    #[serde(default)]
    pub contexts: Option<Vec<String>>,
    #[serde(default)]
    pub checks: Option<Vec<StatusCheck>>,
}

/// One required status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub context: String,
    #[serde(default)]
    pub app_id: Option<i64>,
}

/// Required PR reviews as returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequiredPullRequestReviewsView {
    #[serde(default)]
    pub dismiss_stale_reviews: bool,
    #[serde(default)]
    pub require_code_owner_reviews: bool,
    #[serde(default)]
    pub required_approving_review_count: Option<u32>,
    #[serde(default)]
    pub require_last_push_approval: Option<bool>,
    #[serde(default)]
    pub dismissal_restrictions: Option<RestrictionsView>,
    #[serde(default)]
    pub bypass_pull_request_allowances: Option<RestrictionsView>,
}

/// Actor lists as returned by the API (full records).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestrictionsView {
    #[serde(default)]
    pub users: Vec<Actor>,
    #[serde(default)]
    pub teams: Vec<Actor>,
    #[serde(default)]
    pub apps: Vec<Actor>,
}

/// A user, team, or app entry in a restriction list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Actor {
    /// Login, present for users.
    #[serde(default)]
    pub login: Option<String>,
    /// Slug, present for teams and apps.
    #[serde(default)]
    pub slug: Option<String>,
}

impl Actor {
    /// The identifier the update endpoint expects for this actor.
    #[must_use]
    pub fn ident(&self) -> Option<&str> {
        self.login.as_deref().or(self.slug.as_deref())
    }
}

/// Branch protection as the PUT endpoint *accepts* it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchProtectionUpdate {
    pub required_status_checks: Option<RequiredStatusChecksUpdate>,
    pub enforce_admins: Option<bool>,
    pub required_pull_request_reviews: Option<RequiredPullRequestReviewsUpdate>,
    pub restrictions: Option<RestrictionsUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_linear_history: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_force_pushes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_deletions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_creations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_conversation_resolution: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_branch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_fork_syncing: Option<bool>,
}

/// Required status checks in request form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredStatusChecksUpdate {
    #[serde(default)]
    pub strict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<Vec<StatusCheck>>,
}

/// Required PR reviews in request form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequiredPullRequestReviewsUpdate {
    #[serde(default)]
    pub dismiss_stale_reviews: bool,
    #[serde(default)]
    pub require_code_owner_reviews: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_approving_review_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_last_push_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissal_restrictions: Option<RestrictionsUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_pull_request_allowances: Option<RestrictionsUpdate>,
}

/// Actor lists in request form (slugs only).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestrictionsUpdate {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub apps: Vec<String>,
}

/// GitHub capability consumed by the remediation and alert engines.
#[async_trait]
pub trait GitHub: Send + Sync {
    /// Base API URL, used by dry-runs to render equivalent curl commands.
    fn api_url(&self) -> &str;

    /// Credentials for pushing remediation branches over HTTPS.
    fn git_credentials(&self) -> GitCredentials;

    /// The user behind the provider token; remediation commits are authored
    /// by this identity.
    async fn authenticated_user(&self) -> Result<User, ProviderError>;

    /// All open pull requests in the repository.
    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequest>, ProviderError>;

    /// Open pull requests whose head is `branch`.
    async fn list_pull_requests_by_head(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<PullRequest>, ProviderError>;

    /// Open a pull request from `head` into `base`.
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, ProviderError>;

    /// Close a pull request without merging.
    async fn close_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<(), ProviderError>;

    /// Current protection for `branch`, or `None` if the branch is not
    /// protected.
    async fn branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, ProviderError>;

    /// Replace the protection of `branch` with `update`.
    async fn update_branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        update: &BranchProtectionUpdate,
    ) -> Result<(), ProviderError>;

    /// Resolve a git ref (tag or branch) in an actions repository to its
    /// commit SHA, for pinning mutable workflow references.
    async fn resolve_action_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<String, ProviderError>;

    /// Open a draft repository security advisory; returns its GHSA id.
    async fn create_security_advisory(
        &self,
        owner: &str,
        repo: &str,
        summary: &str,
        description: &str,
    ) -> Result<String, ProviderError>;

    /// Close a previously opened security advisory.
    async fn close_security_advisory(
        &self,
        owner: &str,
        repo: &str,
        ghsa_id: &str,
    ) -> Result<(), ProviderError>;

    /// Comment on an issue or pull request; returns the comment id.
    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ProviderError>;

    /// Delete a previously posted comment.
    async fn delete_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<(), ProviderError>;

    /// Submit a REQUEST_CHANGES review on a pull request; returns the review
    /// id.
    async fn create_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ProviderError>;

    /// Dismiss a previously submitted review.
    async fn dismiss_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        review_id: u64,
        message: &str,
    ) -> Result<(), ProviderError>;
}

/// Rate-limit view cached from the most recent response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Requests remaining in the current window.
    pub remaining: u64,
    /// Unix timestamp at which the window resets.
    pub reset: u64,
}

/// GitHub REST API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    // Single synchronization point shared across concurrent evaluations.
    rate_limit: Mutex<Option<RateLimit>>,
}

impl GitHubClient {
    /// Create a client authenticating with `token`.
    pub fn new(token: &str) -> Result<Self, ProviderError> {
        Self::with_url(token, GITHUB_API_URL)
    }

    /// Create a client against a custom API URL (mock servers in tests,
    /// GitHub Enterprise installations in deployments).
    pub fn with_url(token: &str, api_url: &str) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ProviderError::Config("invalid access token".to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("warden"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(crate::rest::REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            rate_limit: Mutex::new(None),
        })
    }

    /// The most recently observed rate limit, if any request completed yet.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn cache_rate_limit(&self, headers: &HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        if let (Some(remaining), Some(reset)) =
            (parse("x-ratelimit-remaining"), parse("x-ratelimit-reset"))
        {
            let mut cache = self
                .rate_limit
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *cache = Some(RateLimit { remaining, reset });
            if remaining == 0 {
                warn!(reset, "GitHub rate limit exhausted");
            }
        }
    }

    /// Execute a request and decode the JSON response body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.api_url, path.trim_start_matches('/'));
        debug!(method = %method, url = %url, "GitHub API request");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.cache_rate_limit(response.headers());

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json::<Value>().await.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl GitHub for GitHubClient {
    fn api_url(&self) -> &str {
        &self.api_url
    }

    fn git_credentials(&self) -> GitCredentials {
        GitCredentials {
            username: "x-access-token".to_string(),
            password: self.token.clone(),
        }
    }

    #[instrument(skip(self))]
    async fn authenticated_user(&self) -> Result<User, ProviderError> {
        let value = self.request(Method::GET, "user", None).await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequest>, ProviderError> {
        let value = self
            .request(
                Method::GET,
                &format!("repos/{owner}/{repo}/pulls?state=open&per_page=100"),
                None,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    async fn list_pull_requests_by_head(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<PullRequest>, ProviderError> {
        let value = self
            .request(
                Method::GET,
                &format!("repos/{owner}/{repo}/pulls?state=open&head={owner}:{branch}"),
                None,
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self, body))]
    async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, ProviderError> {
        let value = self
            .request(
                Method::POST,
                &format!("repos/{owner}/{repo}/pulls"),
                Some(&json!({
                    "title": title,
                    "body": body,
                    "head": head,
                    "base": base,
                })),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    #[instrument(skip(self))]
    async fn close_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
    ) -> Result<(), ProviderError> {
        self.request(
            Method::PATCH,
            &format!("repos/{owner}/{repo}/pulls/{number}"),
            Some(&json!({"state": "closed"})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, ProviderError> {
        let result = self
            .request(
                Method::GET,
                &format!("repos/{owner}/{repo}/branches/{branch}/protection"),
                None,
            )
            .await;
        match result {
            Ok(value) => Ok(Some(serde_json::from_value(value)?)),
            Err(ProviderError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, update))]
    async fn update_branch_protection(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        update: &BranchProtectionUpdate,
    ) -> Result<(), ProviderError> {
        let body = serde_json::to_value(update)?;
        self.request(
            Method::PUT,
            &format!("repos/{owner}/{repo}/branches/{branch}/protection"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resolve_action_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<String, ProviderError> {
        let value = self
            .request(
                Method::GET,
                &format!("repos/{owner}/{repo}/commits/{git_ref}"),
                None,
            )
            .await?;
        value["sha"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::Api {
                status: 200,
                message: format!("no sha in commit response for {owner}/{repo}@{git_ref}"),
            })
    }

    #[instrument(skip(self, summary, description))]
    async fn create_security_advisory(
        &self,
        owner: &str,
        repo: &str,
        summary: &str,
        description: &str,
    ) -> Result<String, ProviderError> {
        let value = self
            .request(
                Method::POST,
                &format!("repos/{owner}/{repo}/security-advisories"),
                Some(&json!({
                    "summary": summary,
                    "description": description,
                    "vulnerabilities": [{"package": {"ecosystem": "other", "name": repo}}],
                })),
            )
            .await?;
        value["ghsa_id"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| ProviderError::Api {
                status: 200,
                message: "no ghsa_id in advisory response".to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn close_security_advisory(
        &self,
        owner: &str,
        repo: &str,
        ghsa_id: &str,
    ) -> Result<(), ProviderError> {
        self.request(
            Method::PATCH,
            &format!("repos/{owner}/{repo}/security-advisories/{ghsa_id}"),
            Some(&json!({"state": "closed"})),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn create_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ProviderError> {
        let value = self
            .request(
                Method::POST,
                &format!("repos/{owner}/{repo}/issues/{number}/comments"),
                Some(&json!({"body": body})),
            )
            .await?;
        value["id"].as_u64().ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "no id in comment response".to_string(),
        })
    }

    #[instrument(skip(self))]
    async fn delete_issue_comment(
        &self,
        owner: &str,
        repo: &str,
        comment_id: u64,
    ) -> Result<(), ProviderError> {
        self.request(
            Method::DELETE,
            &format!("repos/{owner}/{repo}/issues/comments/{comment_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self, body))]
    async fn create_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<u64, ProviderError> {
        let value = self
            .request(
                Method::POST,
                &format!("repos/{owner}/{repo}/pulls/{number}/reviews"),
                Some(&json!({"body": body, "event": "REQUEST_CHANGES"})),
            )
            .await?;
        value["id"].as_u64().ok_or_else(|| ProviderError::Api {
            status: 200,
            message: "no id in review response".to_string(),
        })
    }

    #[instrument(skip(self, message))]
    async fn dismiss_review(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        review_id: u64,
        message: &str,
    ) -> Result<(), ProviderError> {
        self.request(
            Method::PUT,
            &format!("repos/{owner}/{repo}/pulls/{number}/reviews/{review_id}/dismissals"),
            Some(&json!({"message": message})),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Rest for GitHubClient {
    fn base_url(&self) -> &str {
        &self.api_url
    }

    async fn do_request(
        &self,
        method: &str,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse, ProviderError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProviderError::Config(format!("invalid HTTP method: {method}")))?;
        let url = format!("{}/{}", self.api_url, endpoint.trim_start_matches('/'));

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.cache_rate_limit(response.headers());

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok(RestResponse { status, body })
    }
}

impl Provider for GitHubClient {
    fn name(&self) -> &str {
        "github"
    }

    fn as_rest(&self) -> Option<&dyn Rest> {
        Some(self)
    }

    fn as_github(&self) -> Option<&dyn GitHub> {
        Some(self)
    }
}
