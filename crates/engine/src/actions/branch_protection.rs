//! Branch-protection action: JSON-merge-patch against the current
//! protection view.
//!
//! The GitHub API is asymmetric here: the GET response wraps booleans in
//! `{ enabled }` objects and expands restriction actors to full records,
//! while the PUT request wants flat booleans and slugs. The current view is
//! therefore canonicalized to request form before the user patch is merged
//! in.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::ActionError;
use crate::models::{ActionSetting, BranchProtectionActionConfig};
use crate::statemachine::ActionCmd;
use crate::templates::{action_scope, render_bounded, MAX_BODY_BYTES};
use provider::{
    cancellable, curl, BranchProtection, BranchProtectionUpdate, Provider,
    RequiredPullRequestReviewsUpdate, RequiredStatusChecksUpdate, RestrictionsUpdate,
};
use provider::github::RestrictionsView;

/// Branch-protection remediator.
pub struct BranchProtectionAction {
    class: ActionClass,
    config: BranchProtectionActionConfig,
    provider: Arc<dyn Provider>,
}

impl BranchProtectionAction {
    #[must_use]
    pub fn new(
        class: ActionClass,
        config: BranchProtectionActionConfig,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            class,
            config,
            provider,
        }
    }
}

fn slugs(view: &RestrictionsView) -> RestrictionsUpdate {
    RestrictionsUpdate {
        users: view.users.iter().filter_map(|a| a.ident().map(String::from)).collect(),
        teams: view.teams.iter().filter_map(|a| a.ident().map(String::from)).collect(),
        apps: view.apps.iter().filter_map(|a| a.ident().map(String::from)).collect(),
    }
}

/// Build the request-shape struct from the response-shape view.
#[must_use]
pub fn canonical_request(view: &BranchProtection) -> BranchProtectionUpdate {
    BranchProtectionUpdate {
        required_status_checks: view.required_status_checks.as_ref().map(|checks| {
            let has_checks = checks.checks.as_ref().is_some_and(|c| !c.is_empty());
            RequiredStatusChecksUpdate {
                strict: checks.strict,
                // `contexts` is deprecated but still returned by the server;
                // sending both forms is rejected, so `checks` wins.
                contexts: if has_checks { None } else { checks.contexts.clone() },
                checks: checks.checks.clone(),
            }
        }),
        enforce_admins: view.enforce_admins.map(|f| f.enabled),
        required_pull_request_reviews: view.required_pull_request_reviews.as_ref().map(|reviews| {
            RequiredPullRequestReviewsUpdate {
                dismiss_stale_reviews: reviews.dismiss_stale_reviews,
                require_code_owner_reviews: reviews.require_code_owner_reviews,
                required_approving_review_count: reviews.required_approving_review_count,
                require_last_push_approval: reviews.require_last_push_approval,
                dismissal_restrictions: reviews.dismissal_restrictions.as_ref().map(slugs),
                bypass_pull_request_allowances: reviews
                    .bypass_pull_request_allowances
                    .as_ref()
                    .map(slugs),
            }
        }),
        restrictions: view.restrictions.as_ref().map(slugs),
        required_linear_history: view.required_linear_history.map(|f| f.enabled),
        allow_force_pushes: view.allow_force_pushes.map(|f| f.enabled),
        allow_deletions: view.allow_deletions.map(|f| f.enabled),
        block_creations: view.block_creations.map(|f| f.enabled),
        required_conversation_resolution: view.required_conversation_resolution.map(|f| f.enabled),
        lock_branch: view.lock_branch.map(|f| f.enabled),
        allow_fork_syncing: view.allow_fork_syncing.map(|f| f.enabled),
    }
}

/// Apply `patch` to `target` with RFC 7396 merge-patch semantics.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    if let Value::Object(patch_map) = patch {
        if !target.is_object() {
            *target = Value::Object(serde_json::Map::new());
        }
        if let Value::Object(target_map) = target {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    target_map.remove(key);
                } else {
                    merge_patch(
                        target_map.entry(key.clone()).or_insert(Value::Null),
                        patch_value,
                    );
                }
            }
        }
    } else {
        *target = patch.clone();
    }
}

#[async_trait]
impl Action for BranchProtectionAction {
    fn kind(&self) -> &'static str {
        "gh_branch_protection"
    }

    fn class(&self) -> ActionClass {
        self.class
    }

    async fn do_action(
        &self,
        ctx: &ActionContext<'_>,
        cmd: ActionCmd,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        // Branch protection has no meaningful "off"; rolling back to an
        // unknown earlier state would be guesswork.
        if cmd != ActionCmd::TurnOn {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(
                    "gh_branch_protection",
                    anyhow!("unexpected action command: {cmd}"),
                ),
            );
        }

        let Some(repo) = ctx.entity.as_repository() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(
                    "gh_branch_protection",
                    anyhow!("branch protection applies to repository entities only"),
                ),
            );
        };
        let Some(github) = self.provider.as_github() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed("gh_branch_protection", anyhow!("provider lost GitHub capability")),
            );
        };

        let branch = ctx
            .rule
            .params
            .get("branch")
            .and_then(Value::as_str)
            .filter(|b| !b.is_empty())
            .unwrap_or(&repo.default_branch)
            .to_string();

        let current = match cancellable(
            ctx.cancel,
            github.branch_protection(&repo.owner, &repo.name, &branch),
        )
        .await
        {
            Ok(current) => current,
            Err(err) => {
                return ActionResult::failed(
                    prev_metadata,
                    ActionError::failed("gh_branch_protection", err),
                )
            }
        };
        // Unprotected branch: patch against an empty canonical request.
        let request = current.as_ref().map(canonical_request).unwrap_or_default();

        let scope = action_scope(ctx.entity, &ctx.rule.def, &ctx.rule.params, ctx.eval_output);
        let rendered = match render_bounded(&self.config.patch, &scope, MAX_BODY_BYTES) {
            Ok(rendered) => rendered,
            Err(err) => {
                return ActionResult::failed(
                    prev_metadata,
                    ActionError::failed("gh_branch_protection", err),
                )
            }
        };
        let patch: Value = match serde_json::from_str(&rendered) {
            Ok(patch) => patch,
            Err(err) => {
                return ActionResult::failed(
                    prev_metadata,
                    ActionError::failed("gh_branch_protection", err),
                )
            }
        };

        let mut merged = match serde_json::to_value(&request) {
            Ok(merged) => merged,
            Err(err) => {
                return ActionResult::failed(
                    prev_metadata,
                    ActionError::failed("gh_branch_protection", err),
                )
            }
        };
        merge_patch(&mut merged, &patch);
        let update: BranchProtectionUpdate = match serde_json::from_value(merged.clone()) {
            Ok(update) => update,
            Err(err) => {
                return ActionResult::failed(
                    prev_metadata,
                    ActionError::failed("gh_branch_protection", err),
                )
            }
        };

        let endpoint = format!(
            "repos/{}/{}/branches/{}/protection",
            repo.owner, repo.name, branch
        );

        if setting == ActionSetting::DryRun {
            println!("{}", curl::render("PUT", github.api_url(), &endpoint, Some(&merged)));
            return ActionResult::turned_on(prev_metadata.clone());
        }

        debug!(owner = %repo.owner, repo = %repo.name, branch = %branch, "updating branch protection");
        match cancellable(
            ctx.cancel,
            github.update_branch_protection(&repo.owner, &repo.name, &branch, &update),
        )
        .await
        {
            Ok(()) => {
                info!(owner = %repo.owner, repo = %repo.name, branch = %branch, "branch protection updated");
                ActionResult::turned_on(Value::Object(serde_json::Map::new()))
            }
            Err(err) => ActionResult::failed(
                prev_metadata,
                ActionError::failed("gh_branch_protection", err),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::github::{
        Actor, EnabledFlag, RequiredPullRequestReviewsView, RequiredStatusChecksView,
    };
    use provider::StatusCheck;
    use serde_json::json;

    fn current_view() -> BranchProtection {
        BranchProtection {
            required_status_checks: Some(RequiredStatusChecksView {
                strict: false,
                contexts: Some(vec!["ci".to_string()]),
                checks: Some(vec![StatusCheck {
                    context: "ci".to_string(),
                    app_id: Some(1234),
                }]),
            }),
            required_pull_request_reviews: Some(RequiredPullRequestReviewsView {
                required_approving_review_count: Some(1),
                ..Default::default()
            }),
            allow_force_pushes: Some(EnabledFlag { enabled: true }),
            ..Default::default()
        }
    }

    #[test]
    fn canonicalize_prefers_checks_over_contexts() {
        let request = canonical_request(&current_view());
        let checks = request.required_status_checks.unwrap();
        assert!(checks.contexts.is_none());
        assert_eq!(
            checks.checks,
            Some(vec![StatusCheck {
                context: "ci".to_string(),
                app_id: Some(1234),
            }])
        );
    }

    #[test]
    fn canonicalize_flattens_enabled_and_reduces_actors() {
        let view = BranchProtection {
            enforce_admins: Some(EnabledFlag { enabled: true }),
            restrictions: Some(RestrictionsView {
                users: vec![Actor {
                    login: Some("octocat".to_string()),
                    slug: None,
                }],
                teams: vec![Actor {
                    login: None,
                    slug: Some("release-eng".to_string()),
                }],
                apps: vec![],
            }),
            ..Default::default()
        };
        let request = canonical_request(&view);
        assert_eq!(request.enforce_admins, Some(true));
        let restrictions = request.restrictions.unwrap();
        assert_eq!(restrictions.users, vec!["octocat".to_string()]);
        assert_eq!(restrictions.teams, vec!["release-eng".to_string()]);
    }

    #[test]
    fn merge_patch_updates_preserving_unpatched_fields() {
        let request = canonical_request(&current_view());
        let mut merged = serde_json::to_value(&request).unwrap();
        merge_patch(
            &mut merged,
            &json!({"required_pull_request_reviews": {"required_approving_review_count": 2}}),
        );
        let update: BranchProtectionUpdate = serde_json::from_value(merged).unwrap();

        assert_eq!(
            update
                .required_pull_request_reviews
                .as_ref()
                .unwrap()
                .required_approving_review_count,
            Some(2)
        );
        assert_eq!(update.allow_force_pushes, Some(true));
        let checks = update.required_status_checks.unwrap();
        assert!(checks.contexts.is_none());
        assert!(checks.checks.is_some());
    }

    #[test]
    fn merge_patch_null_removes_and_scalars_replace() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": "x"});
        merge_patch(&mut target, &json!({"a": {"b": null}, "d": "y", "e": 3}));
        assert_eq!(target, json!({"a": {"c": 2}, "d": "y", "e": 3}));
    }
}
