//! Pull-request remediator: content-addressed remediation through a git
//! working tree.
//!
//! The remediator expands the rule's title/body templates, lets a pluggable
//! modifier compute the intended file entries, and embeds a hash of those
//! entries in the PR body as a magic marker. The marker is the PR's
//! identity: an open PR carrying the same marker means the same remediation
//! is already in flight and no new branch or PR is created. Changed intended
//! contents change the marker, producing a new branch; the old PR is left
//! alone.

pub mod fsentry;
pub mod git;
pub mod modifiers;

use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use self::fsentry::magic_marker;
use self::git::CommitAuthor;
use self::modifiers::{new_modifier, ModifierSpawn};
use super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::ActionError;
use crate::models::{ActionSetting, PullRequestActionConfig, Repository};
use crate::statemachine::ActionCmd;
use crate::templates::{action_scope, render_bounded, MAX_BODY_BYTES, MAX_TITLE_BYTES};
use provider::{cancellable, Provider};

const SUBTYPE: &str = "pull_request";

/// Prefix of every remediation branch.
const BRANCH_PREFIX: &str = "minder_";

/// Base branch used when the repository record carries none.
const FALLBACK_BASE: &str = "main";

/// Deterministic branch name derived from the expanded PR title.
fn branch_name(title: &str) -> String {
    format!("{BRANCH_PREFIX}{}", title.to_lowercase().replace(' ', "_"))
}

/// Pull-request remediator. Immutable after construction.
pub struct PullRequestAction {
    config: PullRequestActionConfig,
    provider: Arc<dyn Provider>,
}

impl PullRequestAction {
    #[must_use]
    pub fn new(config: PullRequestActionConfig, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }

    async fn turn_on(
        &self,
        ctx: &ActionContext<'_>,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        let Some(repo) = ctx.entity.as_repository() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("pull-request remediation applies to repository entities only")),
            );
        };
        let Some(github) = self.provider.as_github() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("provider lost GitHub capability")),
            );
        };
        let Some(ingest) = ctx.ingest else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("pull-request remediation requires an ingested working tree")),
            );
        };

        let scope = action_scope(ctx.entity, &ctx.rule.def, &ctx.rule.params, ctx.eval_output);
        let title = match render_bounded(&self.config.title, &scope, MAX_TITLE_BYTES) {
            Ok(title) => title,
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        };

        let spawn = ModifierSpawn {
            config: &self.config,
            def: &ctx.rule.def,
            params: &ctx.rule.params,
            provider: &self.provider,
        };
        let mut modifier = match new_modifier(&spawn) {
            Ok(modifier) => modifier,
            Err(err) => {
                return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
            }
        };
        // Purely in-memory; the working tree is untouched until the git
        // workflow below.
        if let Err(err) = modifier.create_entries(&ingest.root, &scope, ctx.cancel).await {
            return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err));
        }
        if modifier.entries().is_empty() {
            info!(rule = %ctx.rule.name, "modification produced no entries, nothing to remediate");
            return ActionResult::skipped(prev_metadata);
        }

        let marker = magic_marker(&modifier.hash());
        let body = match render_bounded(&self.config.body, &scope, MAX_BODY_BYTES) {
            Ok(body) => body,
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        };
        let body = format!("{marker}\n\n{body}");
        let branch = branch_name(&title);

        if setting == ActionSetting::DryRun {
            println!("{title}");
            println!("{body}");
            let mut stdout = io::stdout();
            if let Err(err) = modifier.write_summary(&mut stdout) {
                warn!(%err, "could not write dry-run summary");
            }
            return ActionResult::turned_on(prev_metadata.clone());
        }

        // The marker makes PR identity content-addressed: same intended
        // contents, same marker, no duplicate PR.
        let open = match cancellable(
            ctx.cancel,
            github.list_open_pull_requests(&repo.owner, &repo.name),
        )
        .await
        {
            Ok(open) => open,
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        };
        if let Some(existing) = open
            .iter()
            .find(|pr| pr.body.as_deref().is_some_and(|b| b.contains(&marker)))
        {
            info!(
                slug = %format!("{}/{}#{}", repo.owner, repo.name, existing.number),
                "remediation PR already open"
            );
            return ActionResult::pending(json!({ "pr_number": existing.number }));
        }

        let user = match cancellable(ctx.cancel, github.authenticated_user()).await {
            Ok(user) => user,
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        };
        let author = CommitAuthor {
            email: user
                .email
                .clone()
                .unwrap_or_else(|| format!("{}@users.noreply.github.com", user.login)),
            name: user.login,
        };

        if let Err(err) = git::commit_and_push(
            &ingest.root,
            &branch,
            &author,
            &title,
            &github.git_credentials(),
            |root| modifier.modify_fs(root),
        ) {
            return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err));
        }

        // The branch may already back an open PR from an earlier run whose
        // contents have since changed; the force-push updated it in place.
        match cancellable(
            ctx.cancel,
            github.list_pull_requests_by_head(&repo.owner, &repo.name, &branch),
        )
        .await
        {
            Ok(existing) if !existing.is_empty() => {
                info!(
                    slug = %format!("{}/{}#{}", repo.owner, repo.name, existing[0].number),
                    "PR from remediation branch already open"
                );
                return ActionResult::pending(json!({ "pr_number": existing[0].number }));
            }
            Ok(_) => {}
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        }

        let base = base_branch(repo);
        match cancellable(
            ctx.cancel,
            github.create_pull_request(&repo.owner, &repo.name, &title, &body, &branch, base),
        )
        .await
        {
            Ok(pr) => {
                info!(
                    slug = %format!("{}/{}#{}", repo.owner, repo.name, pr.number),
                    branch = %branch,
                    "opened remediation PR"
                );
                ActionResult::pending(json!({ "pr_number": pr.number }))
            }
            Err(err) => ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        }
    }

    async fn turn_off(
        &self,
        ctx: &ActionContext<'_>,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        let Some(repo) = ctx.entity.as_repository() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("pull-request remediation applies to repository entities only")),
            );
        };
        let Some(github) = self.provider.as_github() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("provider lost GitHub capability")),
            );
        };

        // Nothing recorded means nothing to close.
        let Some(number) = prev_metadata.get("pr_number").and_then(Value::as_u64) else {
            return ActionResult::skipped(prev_metadata);
        };

        if setting == ActionSetting::DryRun {
            println!("would close PR {}/{}#{number}", repo.owner, repo.name);
            return ActionResult::turned_off(prev_metadata.clone());
        }

        match cancellable(
            ctx.cancel,
            github.close_pull_request(&repo.owner, &repo.name, number),
        )
        .await
        {
            Ok(()) => {
                info!(slug = %format!("{}/{}#{number}", repo.owner, repo.name), "closed remediation PR");
                ActionResult::turned_off(json!({}))
            }
            // Someone already closed it by hand.
            Err(provider::ProviderError::NotFound(_)) => ActionResult::skipped(prev_metadata),
            Err(err) => ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err)),
        }
    }
}

fn base_branch(repo: &Repository) -> &str {
    if repo.default_branch.is_empty() {
        FALLBACK_BASE
    } else {
        &repo.default_branch
    }
}

#[async_trait]
impl Action for PullRequestAction {
    fn kind(&self) -> &'static str {
        SUBTYPE
    }

    fn class(&self) -> ActionClass {
        ActionClass::Remediate
    }

    async fn do_action(
        &self,
        ctx: &ActionContext<'_>,
        cmd: ActionCmd,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        match cmd {
            ActionCmd::TurnOn => self.turn_on(ctx, setting, prev_metadata).await,
            ActionCmd::TurnOff => self.turn_off(ctx, setting, prev_metadata).await,
            ActionCmd::DoNothing => ActionResult::skipped(prev_metadata),
        }
    }
}
