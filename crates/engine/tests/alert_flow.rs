//! End-to-end scenarios for the alert engines.

mod common;

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::RecordingGitHub;
use engine::actions::alert::pr_comment::PullRequestCommentAlert;
use engine::actions::alert::security_advisory::SecurityAdvisoryAlert;
use engine::actions::{Action, ActionContext};
use engine::errors::{ActionError, ActionTransition};
use engine::models::{
    ActionSetting, Entity, PullRequestCommentConfig, PullRequestEntity, Repository, RuleInstance,
    SecurityAdvisoryConfig,
};
use engine::statemachine::ActionCmd;
use provider::Provider;

fn repo_entity() -> Entity {
    Entity::Repository(Repository {
        owner: "stacklok".to_string(),
        name: "minder".to_string(),
        default_branch: "main".to_string(),
        is_private: false,
    })
}

fn rule() -> RuleInstance {
    RuleInstance {
        name: "dependabot_configured".to_string(),
        rule_type: "dependabot".to_string(),
        def: json!({}),
        params: json!({}),
    }
}

#[tokio::test]
async fn advisory_round_trip_stores_and_uses_ghsa_id() {
    let github = Arc::new(RecordingGitHub::new());
    let alert = SecurityAdvisoryAlert::new(
        SecurityAdvisoryConfig::default(),
        Arc::clone(&github) as Arc<dyn Provider>,
    );
    let entity = repo_entity();
    let rule = rule();
    let cancel = CancellationToken::new();
    let ctx = ActionContext {
        entity: &entity,
        rule: &rule,
        eval_output: None,
        ingest: None,
        cancel: &cancel,
    };

    let on = alert
        .do_action(&ctx, ActionCmd::TurnOn, ActionSetting::On, &json!({}))
        .await;
    assert!(matches!(on.outcome, Ok(ActionTransition::TurnedOn)));
    assert_eq!(on.metadata, json!({"ghsa_id": "GHSA-test-0001"}));

    let off = alert
        .do_action(&ctx, ActionCmd::TurnOff, ActionSetting::On, &on.metadata)
        .await;
    assert!(matches!(off.outcome, Ok(ActionTransition::TurnedOff)));
    assert_eq!(off.metadata, json!({}));
}

#[tokio::test]
async fn advisory_turn_off_collapses_missing_state_and_not_found() {
    let github = Arc::new(RecordingGitHub::new());
    let alert = SecurityAdvisoryAlert::new(
        SecurityAdvisoryConfig::default(),
        Arc::clone(&github) as Arc<dyn Provider>,
    );
    let entity = repo_entity();
    let rule = rule();
    let cancel = CancellationToken::new();
    let ctx = ActionContext {
        entity: &entity,
        rule: &rule,
        eval_output: None,
        ingest: None,
        cancel: &cancel,
    };

    // No stored advisory id: nothing to close.
    let off = alert
        .do_action(&ctx, ActionCmd::TurnOff, ActionSetting::On, &json!({}))
        .await;
    assert!(matches!(off.outcome, Err(ActionError::Skipped)));

    // Advisory removed by hand: also a skip.
    let off = alert
        .do_action(&ctx, ActionCmd::TurnOff, ActionSetting::On, &json!({"ghsa_id": "GHSA-gone"}))
        .await;
    assert!(matches!(off.outcome, Err(ActionError::Skipped)));
}

#[tokio::test]
async fn pr_comment_requires_pull_request_entity() {
    let github = Arc::new(RecordingGitHub::new());
    let alert = PullRequestCommentAlert::new(
        PullRequestCommentConfig {
            review_message: "Rule {{params.rule}} drifted".to_string(),
        },
        Arc::clone(&github) as Arc<dyn Provider>,
    );
    let rule = rule();

    // Repository entity: typed failure.
    let entity = repo_entity();
    let cancel = CancellationToken::new();
    let ctx = ActionContext {
        entity: &entity,
        rule: &rule,
        eval_output: None,
        ingest: None,
        cancel: &cancel,
    };
    let result = alert
        .do_action(&ctx, ActionCmd::TurnOn, ActionSetting::On, &json!({}))
        .await;
    assert!(matches!(
        result.outcome,
        Err(ActionError::Failed { subtype: "pull_request_comment", .. })
    ));

    // Pull-request entity: comment id stored.
    let entity = Entity::PullRequest(PullRequestEntity {
        owner: "stacklok".to_string(),
        name: "minder".to_string(),
        number: 44,
        author: None,
    });
    let cancel = CancellationToken::new();
    let ctx = ActionContext {
        entity: &entity,
        rule: &rule,
        eval_output: None,
        ingest: None,
        cancel: &cancel,
    };
    let result = alert
        .do_action(&ctx, ActionCmd::TurnOn, ActionSetting::On, &json!({}))
        .await;
    assert!(matches!(result.outcome, Ok(ActionTransition::TurnedOn)));
    assert_eq!(result.metadata, json!({"comment_id": 9001}));
}
