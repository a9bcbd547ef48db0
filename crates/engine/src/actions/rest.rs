//! REST-call action: expand method/endpoint/body templates and dispatch one
//! HTTP request through the provider.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::{Action, ActionClass, ActionContext, ActionResult};
use crate::errors::{ActionError, RestError};
use crate::models::{ActionSetting, RestActionConfig};
use crate::statemachine::ActionCmd;
use crate::templates::{
    action_scope, render_bounded, MAX_BODY_BYTES, MAX_ENDPOINT_BYTES, MAX_METHOD_BYTES,
};
use provider::{cancellable, curl, Provider};

const DEFAULT_METHOD: &str = "PATCH";

/// The expanded request a single invocation would dispatch.
#[derive(Debug)]
struct ExpandedRequest {
    method: String,
    endpoint: String,
    body: Option<Value>,
}

/// REST remediator (also usable as a REST alerter).
pub struct RestAction {
    class: ActionClass,
    config: RestActionConfig,
    provider: Arc<dyn Provider>,
}

impl RestAction {
    #[must_use]
    pub fn new(class: ActionClass, config: RestActionConfig, provider: Arc<dyn Provider>) -> Self {
        Self {
            class,
            config,
            provider,
        }
    }

    fn expand(&self, scope: &Value) -> Result<ExpandedRequest, ActionError> {
        let method_template = self
            .config
            .action_method
            .as_deref()
            .unwrap_or(DEFAULT_METHOD);
        let method = render_bounded(method_template, scope, MAX_METHOD_BYTES)
            .map_err(|e| ActionError::failed("rest", e))?;
        let endpoint = render_bounded(&self.config.endpoint, scope, MAX_ENDPOINT_BYTES)
            .map_err(|e| ActionError::failed("rest", e))?;

        let body = match &self.config.body {
            Some(template) => {
                let rendered = render_bounded(template, scope, MAX_BODY_BYTES)
                    .map_err(|e| ActionError::failed("rest", e))?;
                if rendered.is_empty() {
                    None
                } else {
                    Some(
                        serde_json::from_str::<Value>(&rendered)
                            .map_err(|e| ActionError::failed("rest", e))?,
                    )
                }
            }
            None => None,
        };

        Ok(ExpandedRequest {
            method: method.to_uppercase(),
            endpoint,
            body,
        })
    }

    /// The curl command an operator would run to apply this request by hand.
    fn curl_command(&self, request: &ExpandedRequest) -> String {
        let base = self
            .provider
            .as_rest()
            .map_or("", |rest| rest.base_url());
        curl::render(
            &request.method,
            base,
            &request.endpoint,
            request.body.as_ref(),
        )
    }
}

#[async_trait]
impl Action for RestAction {
    fn kind(&self) -> &'static str {
        "rest"
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
        // REST calls have no stored state to withdraw; only turn-on is
        // meaningful.
        if cmd != ActionCmd::TurnOn {
            return ActionResult::skipped(prev_metadata);
        }

        let scope = action_scope(
            ctx.entity,
            &ctx.rule.def,
            &ctx.rule.params,
            ctx.eval_output,
        );
        let request = match self.expand(&scope) {
            Ok(request) => request,
            Err(err) => return ActionResult::failed(prev_metadata, err),
        };

        if setting == ActionSetting::DryRun {
            println!("{}", self.curl_command(&request));
            return ActionResult::turned_on(prev_metadata.clone());
        }

        let Some(rest) = self.provider.as_rest() else {
            return ActionResult::failed(
                prev_metadata,
                ActionError::failed("rest", anyhow!("provider lost REST capability")),
            );
        };

        debug!(method = %request.method, endpoint = %request.endpoint, "dispatching remediation request");
        let response = match cancellable(
            ctx.cancel,
            rest.do_request(&request.method, &request.endpoint, request.body.as_ref()),
        )
        .await
        {
            Ok(response) => response,
            Err(err) => return ActionResult::failed(prev_metadata, ActionError::failed("rest", err)),
        };

        match RestError::from_status(response.status) {
            None => {
                info!(status = response.status, endpoint = %request.endpoint, "remediation request applied");
                ActionResult::turned_on(Value::Object(serde_json::Map::new()))
            }
            Some(err) => ActionResult::failed(prev_metadata, ActionError::failed("rest", err)),
        }
    }
}
