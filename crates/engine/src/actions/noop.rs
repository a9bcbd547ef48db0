//! Fallback engine for rule types without a remediation or alert block.

use async_trait::async_trait;
use serde_json::Value;

use super::{Action, ActionClass, ActionContext, ActionResult};
use crate::models::ActionSetting;
use crate::statemachine::ActionCmd;

/// Always reports "not available".
pub struct NoopAction {
    class: ActionClass,
}

impl NoopAction {
    #[must_use]
    pub fn new(class: ActionClass) -> Self {
        Self { class }
    }
}

#[async_trait]
impl Action for NoopAction {
    fn kind(&self) -> &'static str {
        "noop"
    }

    fn class(&self) -> ActionClass {
        self.class
    }

    async fn do_action(
        &self,
        _ctx: &ActionContext<'_>,
        _cmd: ActionCmd,
        _setting: ActionSetting,
        prev_metadata: &Value,
    ) -> ActionResult {
        ActionResult::not_available(prev_metadata)
    }
}
