//! PR-review alerter: drift on a pull-request entity blocks it with a
//! REQUEST_CHANGES review until resolved.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::ActionError;
use crate::models::{ActionSetting, PullRequestReviewConfig};
use crate::statemachine::ActionCmd;
use crate::templates::{action_scope, render_bounded, MAX_BODY_BYTES};
use provider::{cancellable, Provider};

const SUBTYPE: &str = "pull_request_review";

const DISMISSAL_MESSAGE: &str = "Policy drift resolved, dismissing review.";

/// Submits and dismisses blocking reviews on pull requests.
pub struct PullRequestReviewAlert {
    config: PullRequestReviewConfig,
    provider: Arc<dyn Provider>,
}

impl PullRequestReviewAlert {
    #[must_use]
    pub fn new(config: PullRequestReviewConfig, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }
}

#[async_trait]
impl Action for PullRequestReviewAlert {
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
                ActionError::failed(SUBTYPE, anyhow!("PR reviews apply to pull-request entities only")),
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
                    github.create_review(&pr.owner, &pr.name, pr.number, &body),
                )
                .await
                {
                    Ok(review_id) => {
                        info!(slug = %format!("{}/{}#{}", pr.owner, pr.name, pr.number), review_id, "submitted blocking review");
                        ActionResult::turned_on(json!({ "review_id": review_id }))
                    }
                    Err(err) => {
                        ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
                    }
                }
            }
            ActionCmd::TurnOff => {
                let Some(review_id) = prev_metadata.get("review_id").and_then(Value::as_u64)
                else {
                    return ActionResult::skipped(prev_metadata);
                };
                if setting == ActionSetting::DryRun {
                    println!("would dismiss review {review_id}");
                    return ActionResult::turned_off(prev_metadata.clone());
                }
                match cancellable(
                    ctx.cancel,
                    github.dismiss_review(&pr.owner, &pr.name, pr.number, review_id, DISMISSAL_MESSAGE),
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
