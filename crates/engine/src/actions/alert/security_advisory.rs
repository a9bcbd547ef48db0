//! Security-advisory alerter: drift is surfaced as a draft repository
//! security advisory.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::ActionError;
use crate::models::{ActionSetting, SecurityAdvisoryConfig};
use crate::statemachine::ActionCmd;
use provider::{cancellable, Provider};

const SUBTYPE: &str = "security_advisory";

/// Raises and resolves repository security advisories.
pub struct SecurityAdvisoryAlert {
    config: SecurityAdvisoryConfig,
    provider: Arc<dyn Provider>,
}

impl SecurityAdvisoryAlert {
    #[must_use]
    pub fn new(config: SecurityAdvisoryConfig, provider: Arc<dyn Provider>) -> Self {
        Self { config, provider }
    }

    fn summary(&self, ctx: &ActionContext<'_>) -> String {
        format!("{} policy violation in profile rule {}", SUBTYPE_TITLE, ctx.rule.name)
    }

    fn description(&self, ctx: &ActionContext<'_>) -> String {
        let severity = self.config.severity.as_deref().unwrap_or("medium");
        format!(
            "Rule `{}` (type `{}`) detected drift on this repository.\n\nSeverity: {severity}.\n\nThis advisory is closed automatically once the drift is resolved.",
            ctx.rule.name, ctx.rule.rule_type
        )
    }
}

const SUBTYPE_TITLE: &str = "Supply-chain";

#[async_trait]
impl Action for SecurityAdvisoryAlert {
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
        let Some(repo) = ctx.entity.as_repository() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed(SUBTYPE, anyhow!("security advisories apply to repository entities only")),
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
                let summary = self.summary(ctx);
                let description = self.description(ctx);
                if setting == ActionSetting::DryRun {
                    println!("{summary}\n\n{description}");
                    return ActionResult::turned_on(prev_metadata.clone());
                }
                match cancellable(
                    ctx.cancel,
                    github.create_security_advisory(&repo.owner, &repo.name, &summary, &description),
                )
                .await
                {
                    Ok(ghsa_id) => {
                        info!(owner = %repo.owner, repo = %repo.name, %ghsa_id, "opened security advisory");
                        ActionResult::turned_on(json!({ "ghsa_id": ghsa_id }))
                    }
                    Err(err) => {
                        ActionResult::failed(prev_metadata, ActionError::failed(SUBTYPE, err))
                    }
                }
            }
            ActionCmd::TurnOff => {
                let Some(ghsa_id) = prev_metadata.get("ghsa_id").and_then(Value::as_str) else {
                    return ActionResult::skipped(prev_metadata);
                };
                if setting == ActionSetting::DryRun {
                    println!("would close security advisory {ghsa_id}");
                    return ActionResult::turned_off(prev_metadata.clone());
                }
                match cancellable(
                    ctx.cancel,
                    github.close_security_advisory(&repo.owner, &repo.name, ghsa_id),
                )
                .await
                {
                    Ok(()) => {
                        info!(owner = %repo.owner, repo = %repo.name, %ghsa_id, "closed security advisory");
                        ActionResult::turned_off(json!({}))
                    }
                    // Deleted or closed by hand.
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
