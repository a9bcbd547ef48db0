//! PR-comment alerter: drift on a pull-request entity is surfaced as a
//! comment on the PR itself.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::ActionError;
use crate::models::{ActionSetting, PullRequestCommentConfig};
use crate::statemachine::ActionCmd;
use crate::templates::{action_scope, render_bounded, MAX_BODY_BYTES};
use provider::{cancellable, Provider};

const SUBTYPE: &str = "pull_request_comment";

/// Posts and withdraws alert comments on pull requests.
pub struct PullRequestCommentAlert {
    config: PullRequestCommentConfig,
    provider: Arc<dyn Provider>,
}

impl PullRequestCommentAlert {
    #[must_use]
    pub fn new(config: PullRequestCommentConfig, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }
}

#[async_trait]
impl Action for PullRequestCommentAlert {
    fn kind(&self) -> &'static str {
        SUBTYPE
    }

    fn class(&self) -> ActionClass {
        ActionClass::Alert
    }

    async fn do_action(
        &self,
        ctx: &ActionContext<'_>,
        cmd: ActionCmd,
        setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        let Some(pr) = ctx.entity.as_pull_request() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("PR comments apply to pull-request entities only")),
            );
        };
        let Some(github) = self.provider.as_github() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("provider lost GitHub capability")),
            );
        };

        match cmd {
            ActionCmd::DoNothing => ActionResult::skipped(prev_metadata),
            ActionCmd::TurnOn => {
                let scope =
                    action_scope(ctx.entity, &ctx.rule.def, &ctx.rule.params, ctx.eval_output);
                let body = match render_bounded(&self.config.review_message, &scope, MAX_BODY_BYTES)
                {
                    Ok(body) => body,
                    Err(err) => {
                        return ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
                    }
                };
                if setting == ActionSetting::DryRun {
                    println!("{body}");
                    return ActionResult::turned_on(prev_metadata.clone());
                }
                match cancellable(
                    ctx.cancel,
                    github.create_issue_comment(&pr.owner, &pr.name, pr.number, &body),
                )
                .await
                {
                    Ok(comment_id) => {
                        info!(slug = %format!("{}/{}#{}", pr.owner, pr.name, pr.number), comment_id, "posted alert comment");
                        ActionResult::turned_on(json!({ "comment_id": comment_id }))
                    }
                    Err(err) => {
                        ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
                    }
                }
            }
            ActionCmd::TurnOff => {
                let Some(comment_id) = prev_metadata.get("comment_id").and_then(Value::as_u64)
                else {
                    return ActionResult::skipped(prev_metadata);
                };
                if setting == ActionSetting::DryRun {
                    println!("would delete alert comment {comment_id}");
                    return ActionResult::turned_off(prev_metadata.clone());
                }
                match cancellable(
                    ctx.cancel,
                    github.delete_issue_comment(&pr.owner, &pr.name, comment_id),
                )
                .await
                {
                    Ok(()) => ActionResult::turned_off(json!({})),
                    Err(provider::ProviderError::NotFound(_)) => {
                        ActionResult::skipped(prev_metadata)
                    }
                    Err(err) => {
                        ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
                    }
                }
            }
        }
    }
}
