//! Execution scenarios run end to end through the engine.

use super::*;
use crate::config::{QualityRequirements, SafetyRequirements};
use crate::core::NodeErrorKind;
use crate::errors::GraphValidationError;
use crate::events::CollectingEventSink;
use crate::executor::{AgentError, AgentResponse, BackoffStrategy, RetrySettings};
use crate::graph::{ApprovalOptions, Edge, EdgeCondition, Node, RetryPolicy};
use crate::hitl::ChannelHitlNotifier;
use crate::quality::{QualityAssessment, RerunStrategy};
use crate::state::MockExecutionStateStore;
use crate::testing::{
    approval_graph, fan_out_graph, linear_graph, test_node, FailingStore, FailureMode,
    RecordingSafetyValidator, ScriptedAgent, ScriptedQualityGate,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

fn engine_with(agent: &Arc<ScriptedAgent>) -> ExecutionEngine {
    ExecutionEngine::builder(agent.clone()).build().unwrap()
}

fn fast_retry() -> RetrySettings {
    RetrySettings::new().with_base_delay_ms(1).with_max_delay_ms(5)
}

fn quality(
    gate: ScriptedQualityGate,
    requirements: QualityRequirements,
) -> (ExecutionConfig, Arc<ScriptedQualityGate>) {
    let config = ExecutionConfig::default().with_quality(requirements);
    (config, Arc::new(gate))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_linear_graph_completes_in_order() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);

    let result = engine
        .execute_graph(linear_graph(&["a", "b", "c"]), None, Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.completed_nodes, ids(&["a", "b", "c"]));
    assert!(result.failed_nodes.is_empty());
    assert_eq!(agent.called_nodes(), ids(&["a", "b", "c"]));
    assert_eq!(result.output["b"]["node"], json!("b"));
    assert!(result.is_success());
    assert!(engine.active_executions().is_empty());
}

#[tokio::test]
async fn test_failed_dependency_fails_downstream() {
    let agent = Arc::new(ScriptedAgent::new().with_response("a", AgentResponse::error("bad input")));
    let engine = engine_with(&agent);

    let result = engine
        .execute_graph(linear_graph(&["a", "b"]), None, Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.failed_nodes, ids(&["a", "b"]));
    assert_eq!(agent.call_count("b"), 0);
    assert_eq!(
        result.results["b"].error_kind(),
        Some(NodeErrorKind::UpstreamFailure)
    );
    assert_eq!(result.results["a"].error_kind(), Some(NodeErrorKind::AgentError));
    assert_eq!(result.error.as_deref(), Some("2 node(s) failed: a, b"));
}

#[tokio::test]
async fn test_failure_does_not_abort_independent_branch() {
    let agent = Arc::new(ScriptedAgent::new().with_response("a", AgentResponse::error("boom")));
    let engine = engine_with(&agent);
    let graph = linear_graph(&["a", "b"]).with_node(test_node("solo"));

    let result = engine.execute_graph(graph, None, Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.completed_nodes, ids(&["solo"]));
    assert_eq!(agent.call_count("solo"), 1);
}

#[tokio::test]
async fn test_pause_then_approve_completes() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);

    let paused = engine
        .execute_graph(approval_graph(), None, Map::new())
        .await
        .unwrap();

    assert_eq!(paused.status, ExecutionStatus::PausedForApproval);
    assert_eq!(paused.paused_at_node.as_deref(), Some("approve"));
    assert_eq!(paused.paused_reason.as_deref(), Some("Publish the prepared report"));
    assert!(paused.is_paused());
    assert!(engine.active_executions().is_empty());

    let stored = engine.get_execution(&paused.execution_id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::PausedForApproval);

    let resumed = engine
        .resume(&paused.execution_id, ApprovalDecision::Approved, None)
        .await
        .unwrap();

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.completed_nodes, ids(&["prepare", "approve", "publish"]));
    assert_eq!(resumed.skipped_nodes, ids(&["discard"]));
    assert_eq!(agent.call_count("prepare"), 1);
    assert_eq!(agent.call_count("publish"), 1);
    assert_eq!(agent.call_count("discard"), 0);
    assert_eq!(
        resumed.results["approve"].result,
        Some(json!({"approved": true, "modified_context": null}))
    );
}

#[tokio::test]
async fn test_reject_takes_reject_branch() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);

    let paused = engine
        .execute_graph(approval_graph(), None, Map::new())
        .await
        .unwrap();
    let result = engine
        .resume(&paused.execution_id, ApprovalDecision::Rejected, None)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.skipped_nodes, ids(&["publish"]));
    assert_eq!(agent.call_count("discard"), 1);
    assert_eq!(agent.call_count("publish"), 0);
}

#[tokio::test]
async fn test_reject_falls_through_to_plain_dependents() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("fallthrough")
        .with_node(test_node("prep"))
        .with_node(
            Node::approval("h", "Ship it?")
                .with_approval_options(ApprovalOptions::new("Ship it?").with_fallthrough())
                .with_dependency("prep")
                .on_approve(["p"]),
        )
        .with_node(test_node("p"))
        .with_node(test_node("z").with_dependency("h"));

    let paused = engine.execute_graph(graph, None, Map::new()).await.unwrap();
    assert_eq!(paused.paused_at_node.as_deref(), Some("h"));

    let result = engine
        .resume(&paused.execution_id, ApprovalDecision::Rejected, None)
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.completed_nodes, ids(&["prep", "h", "z"]));
    assert_eq!(result.skipped_nodes, ids(&["p"]));
    assert_eq!(agent.call_count("p"), 0);
    assert_eq!(agent.call_count("z"), 1);
}

#[tokio::test]
async fn test_resume_merges_modified_context() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("ctx")
        .with_node(
            Node::approval("gate", "Confirm recipient")
                .on_approve(["send"])
                .on_reject(Vec::<String>::new()),
        )
        .with_node(test_node("send").with_input(json!({"to": "${context.recipient}"})));

    let mut context = Map::new();
    context.insert("recipient".into(), json!("ops@example.com"));
    let paused = engine.execute_graph(graph, None, context).await.unwrap();

    let mut modified = Map::new();
    modified.insert("recipient".into(), json!("ada@example.com"));
    let result = engine
        .resume(&paused.execution_id, ApprovalDecision::Approved, Some(modified))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    let call = agent.calls().into_iter().find(|c| c.node_id == "send").unwrap();
    assert_eq!(call.input, json!({"to": "ada@example.com"}));

    let state = engine.get_execution(&paused.execution_id).await.unwrap();
    assert_eq!(state.context["recipient"], json!("ada@example.com"));
}

#[tokio::test]
async fn test_resume_errors() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);

    let err = assert_err!(engine.resume("missing", ApprovalDecision::Approved, None).await);
    assert!(matches!(err, EngineError::ExecutionNotFound(id) if id == "missing"));

    let done = engine
        .execute_graph(linear_graph(&["a"]), None, Map::new())
        .await
        .unwrap();
    let err = assert_err!(
        engine
            .resume(&done.execution_id, ApprovalDecision::Approved, None)
            .await
    );
    assert!(matches!(
        err,
        EngineError::InvalidState {
            status: ExecutionStatus::Completed,
            operation: "resume",
            ..
        }
    ));
}

#[tokio::test]
async fn test_concurrent_resume_applies_once() {
    let agent = Arc::new(ScriptedAgent::new().with_delay("publish", Duration::from_millis(20)));
    let engine = engine_with(&agent);

    let paused = engine
        .execute_graph(approval_graph(), None, Map::new())
        .await
        .unwrap();
    let id = paused.execution_id.as_str();

    let (first, second) = tokio::join!(
        engine.resume(id, ApprovalDecision::Approved, None),
        engine.resume(id, ApprovalDecision::Approved, None),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(EngineError::InvalidState { .. }))));
    assert_eq!(agent.call_count("publish"), 1);
}

#[tokio::test]
async fn test_pause_notifies_operator() {
    let agent = Arc::new(ScriptedAgent::new());
    let (notifier, mut notices) = ChannelHitlNotifier::new();
    let engine = ExecutionEngine::builder(agent.clone())
        .with_notifier(Arc::new(notifier))
        .build()
        .unwrap();

    let paused = engine
        .execute_graph(approval_graph(), None, Map::new())
        .await
        .unwrap();

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.execution_id, paused.execution_id);
    assert_eq!(notice.node_id, "approve");
    assert_eq!(notice.action_description, "Publish the prepared report");
}

#[tokio::test]
async fn test_pause_fails_when_state_cannot_be_stored() {
    let agent = Arc::new(ScriptedAgent::new());
    let store = Arc::new(FailingStore::new(FailureMode::PausedPuts));
    let engine = ExecutionEngine::builder(agent.clone())
        .with_store(store.clone())
        .build()
        .unwrap();

    let err = assert_err!(engine.execute_graph(approval_graph(), None, Map::new()).await);

    assert!(matches!(
        err,
        EngineError::PersistenceRequiredForPauseFailed { ref node_id, .. } if node_id == "approve"
    ));
    assert_eq!(store.rejected_puts(), 1);
    assert!(engine.active_executions().is_empty());
}

#[tokio::test]
async fn test_pause_persistence_failure_with_mock_store() {
    let agent = Arc::new(ScriptedAgent::new());
    let mut store = MockExecutionStateStore::new();
    store.expect_put().returning(|_, state| {
        if state.status == ExecutionStatus::PausedForApproval {
            Err(StoreError::Backend("disk full".into()))
        } else {
            Ok(())
        }
    });
    store.expect_get().never();

    let engine = ExecutionEngine::builder(agent)
        .with_store(Arc::new(store))
        .build()
        .unwrap();
    let err = assert_err!(engine.execute_graph(approval_graph(), None, Map::new()).await);

    assert!(err.to_string().contains("disk full"));
}

#[tokio::test]
async fn test_best_effort_persistence_does_not_abort() {
    let agent = Arc::new(ScriptedAgent::new());
    let store = Arc::new(FailingStore::new(FailureMode::AllPuts));
    let engine = ExecutionEngine::builder(agent.clone())
        .with_store(store.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a", "b"]), None, Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(store.rejected_puts() > 0);
    let err = assert_err!(engine.get_execution(&result.execution_id).await);
    assert!(matches!(err, EngineError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_single_pass_below_threshold_fails_quality() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::always(QualityAssessment::rerun(0.5, RerunStrategy::Full, vec![])),
        QualityRequirements::enabled()
            .with_accuracy_threshold(1.0)
            .with_max_rerun_attempts(0),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::FailedQuality);
    assert_eq!(result.attempt_count, 0);
    assert_eq!(gate.call_count(), 1);
    assert_eq!(agent.call_count("a"), 1);
    assert_eq!(result.quality.unwrap().quality_score, 0.5);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_rerun_budget_bounds_passes() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::always(QualityAssessment::rerun(0.2, RerunStrategy::Full, vec![])),
        QualityRequirements::enabled().with_max_rerun_attempts(2),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a", "b"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::FailedQuality);
    assert_eq!(result.attempt_count, 2);
    assert_eq!(agent.call_count("a"), 3);
    assert_eq!(agent.call_count("b"), 3);
    assert_eq!(gate.attempts(), vec![0, 1, 2]);

    let state = engine.get_execution(&result.execution_id).await.unwrap();
    assert_eq!(state.quality_history.len(), 3);
}

#[tokio::test]
async fn test_partial_rerun_resets_downstream_only() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::new([
            QualityAssessment::rerun(0.6, RerunStrategy::Partial, ids(&["b"])),
            QualityAssessment::accept(0.95),
        ]),
        QualityRequirements::enabled(),
    );
    let sink = Arc::new(CollectingEventSink::new());
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate.clone())
        .with_event_sink(sink.clone())
        .build()
        .unwrap();
    let graph = linear_graph(&["a", "b", "c"]).with_node(test_node("x"));

    let result = engine.execute_graph(graph, Some(config), Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.attempt_count, 1);
    assert_eq!(agent.call_count("a"), 1);
    assert_eq!(agent.call_count("x"), 1);
    assert_eq!(agent.call_count("b"), 2);
    assert_eq!(agent.call_count("c"), 2);

    let rerun = sink.events_of_type("execution.rerun");
    assert_eq!(rerun.len(), 1);
    assert_eq!(rerun[0].get("strategy"), Some(&json!("partial")));
    assert_eq!(rerun[0].get("nodes"), Some(&json!(["b", "c"])));
}

#[tokio::test]
async fn test_quality_gate_error_finishes_without_rerun() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::failing("scorer offline"),
        QualityRequirements::enabled(),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate)
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(agent.call_count("a"), 1);
    assert!(result.quality.is_none());
}

#[tokio::test]
async fn test_none_strategy_accepts_low_score() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::always(QualityAssessment::rerun(0.1, RerunStrategy::Full, vec![])),
        QualityRequirements::enabled().with_rerun_strategy(RerunStrategy::None),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate)
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(agent.call_count("a"), 1);
}

#[tokio::test]
async fn test_gate_none_under_adaptive_keeps_rerun_budget() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::always(QualityAssessment::rerun(0.2, RerunStrategy::None, vec![])),
        QualityRequirements::enabled().with_max_rerun_attempts(2),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::FailedQuality);
    assert_eq!(result.attempt_count, 2);
    assert_eq!(agent.call_count("a"), 3);
    assert_eq!(gate.attempts(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_gate_none_single_pass_below_threshold_fails_quality() {
    let agent = Arc::new(ScriptedAgent::new());
    let (config, gate) = quality(
        ScriptedQualityGate::always(QualityAssessment::rerun(0.5, RerunStrategy::None, vec![])),
        QualityRequirements::enabled()
            .with_accuracy_threshold(1.0)
            .with_max_rerun_attempts(0),
    );
    let engine = ExecutionEngine::builder(agent.clone())
        .with_quality_gate(gate.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::FailedQuality);
    assert_eq!(result.attempt_count, 0);
    assert_eq!(gate.call_count(), 1);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let agent = Arc::new(ScriptedAgent::new().with_default_delay(Duration::from_millis(50)));
    let engine = engine_with(&agent);
    let config = ExecutionConfig::default().with_max_parallel(3);

    let result = engine
        .execute_graph(fan_out_graph(8), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.completed_nodes.len(), 10);
    assert_eq!(agent.max_concurrency(), 3);
}

#[tokio::test]
async fn test_dependencies_finish_before_dependents_start() {
    let agent = Arc::new(ScriptedAgent::new().with_default_delay(Duration::from_millis(5)));
    let engine = engine_with(&agent);
    let graph = fan_out_graph(4);

    let result = engine
        .execute_graph(graph.clone(), None, Map::new())
        .await
        .unwrap();

    for node in &graph.nodes {
        for dep in &node.dependencies {
            let upstream = &result.results[dep];
            let downstream = &result.results[&node.id];
            assert!(
                upstream.timestamp <= downstream.started_at,
                "{dep} must finish before {} starts",
                node.id
            );
        }
    }
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let agent = Arc::new(
        ScriptedAgent::new()
            .with_response("a", AgentResponse::transient_error("busy"))
            .with_result("a", json!({"ok": true})),
    );
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("retry").with_node(
        test_node("a").with_retry_policy(RetryPolicy::new(3, BackoffStrategy::Constant)),
    );
    let config = ExecutionConfig::default().with_retry(fast_retry());

    let result = engine.execute_graph(graph, Some(config), Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.results["a"].attempts, 2);
    assert_eq!(agent.call_count("a"), 2);
}

#[tokio::test]
async fn test_validation_error_is_not_retried() {
    let agent = Arc::new(ScriptedAgent::new().with_error("a", AgentError::Validation("bad".into())));
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("no-retry").with_node(
        test_node("a").with_retry_policy(RetryPolicy::new(5, BackoffStrategy::Linear)),
    );
    let config = ExecutionConfig::default().with_retry(fast_retry());

    let result = engine.execute_graph(graph, Some(config), Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(agent.call_count("a"), 1);
}

#[tokio::test]
async fn test_slow_node_times_out() {
    let agent = Arc::new(ScriptedAgent::new().with_delay("slow", Duration::from_millis(500)));
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("timeout").with_node(test_node("slow").with_timeout_ms(20));

    let result = engine.execute_graph(graph, None, Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.results["slow"].error_kind(), Some(NodeErrorKind::Timeout));
}

#[tokio::test]
async fn test_conditional_and_failure_paths() {
    let agent = Arc::new(
        ScriptedAgent::new()
            .with_result("classify", json!({"route": "billing"}))
            .with_response("charge", AgentResponse::error("card declined")),
    );
    let engine = engine_with(&agent);
    let route = |value: &str| EdgeCondition::Equals {
        field: "route".into(),
        value: json!(value),
    };
    let graph = IntentGraph::new("routing")
        .with_node(test_node("classify"))
        .with_node(test_node("billing"))
        .with_node(test_node("support"))
        .with_node(test_node("support_followup").with_dependency("support"))
        .with_node(test_node("charge").with_dependency("billing"))
        .with_node(test_node("refund_notice"))
        .with_node(test_node("receipt").with_dependency("charge"))
        .with_edge(Edge::conditional("classify", "billing", route("billing")))
        .with_edge(Edge::conditional("classify", "support", route("support")))
        .with_edge(Edge::conditional("charge", "refund_notice", EdgeCondition::OnFailure));

    let result = engine.execute_graph(graph, None, Map::new()).await.unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.skipped_nodes, ids(&["support", "support_followup"]));
    assert_eq!(result.failed_nodes, ids(&["charge", "receipt"]));
    assert!(result.completed_nodes.contains(&"refund_notice".to_string()));
    assert_eq!(agent.call_count("support"), 0);
    assert_eq!(agent.call_count("receipt"), 0);
}

#[tokio::test]
async fn test_placeholders_flow_between_nodes() {
    let agent = Arc::new(ScriptedAgent::new().with_result("fetch", json!({"total": 42})));
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("placeholders")
        .with_node(test_node("fetch"))
        .with_node(
            test_node("report")
                .with_dependency("fetch")
                .with_input(json!({"total": "${fetch.total}", "title": "Report for ${context.user}"})),
        );
    let mut context = Map::new();
    context.insert("user".into(), json!("ada"));

    engine.execute_graph(graph, None, context).await.unwrap();

    let call = agent.calls().into_iter().find(|c| c.node_id == "report").unwrap();
    assert_eq!(call.input, json!({"total": 42, "title": "Report for ada"}));
}

#[tokio::test]
async fn test_invalid_graph_is_rejected_before_dispatch() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("cyclic")
        .with_node(test_node("a").with_dependency("b"))
        .with_node(test_node("b").with_dependency("a"));

    let err = assert_err!(engine.execute_graph(graph, None, Map::new()).await);

    assert!(matches!(
        err,
        EngineError::Validation(GraphValidationError::CycleDetected { .. })
    ));
    assert!(agent.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_condition_pattern_is_rejected_before_dispatch() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);
    let graph = IntentGraph::new("typo")
        .with_node(test_node("classify"))
        .with_node(test_node("quarantine"))
        .with_edge(Edge::conditional(
            "classify",
            "quarantine",
            EdgeCondition::Matches {
                field: "label".into(),
                pattern: "[spam".into(),
            },
        ));

    let err = assert_err!(engine.execute_graph(graph, None, Map::new()).await);

    assert!(matches!(
        err,
        EngineError::Validation(GraphValidationError::InvalidCondition { .. })
    ));
    assert!(agent.calls().is_empty());
}

#[tokio::test]
async fn test_safety_precheck_rejects_request() {
    let agent = Arc::new(ScriptedAgent::new());
    let validator = Arc::new(RecordingSafetyValidator::rejecting(["pii detected"]));
    let engine = ExecutionEngine::builder(agent.clone())
        .with_safety_validator(validator.clone())
        .build()
        .unwrap();
    let config = ExecutionConfig::default().with_safety(SafetyRequirements::with_rules(["pii"]));

    let err = assert_err!(
        engine
            .execute_graph(linear_graph(&["a"]), Some(config), Map::new())
            .await
    );

    assert!(matches!(err, EngineError::SafetyCheckFailed { ref errors } if errors == &ids(&["pii detected"])));
    assert!(agent.calls().is_empty());
    assert_eq!(validator.inputs()[0]["graph_id"], json!("linear"));
}

#[tokio::test]
async fn test_safety_is_skipped_when_disabled() {
    let agent = Arc::new(ScriptedAgent::new());
    let validator = Arc::new(RecordingSafetyValidator::rejecting(["never consulted"]));
    let engine = ExecutionEngine::builder(agent.clone())
        .with_safety_validator(validator.clone())
        .build()
        .unwrap();

    let result = assert_ok!(
        engine
            .execute_graph(linear_graph(&["a"]), None, Map::new())
            .await
    );

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(validator.inputs().is_empty());
}

#[tokio::test]
async fn test_output_is_sanitized() {
    let agent = Arc::new(ScriptedAgent::new().with_result("a", json!({"ssn": "123-45-6789"})));
    let validator = Arc::new(RecordingSafetyValidator::new().with_redacted_key("a"));
    let engine = ExecutionEngine::builder(agent.clone())
        .with_safety_validator(validator.clone())
        .build()
        .unwrap();
    let config = ExecutionConfig::default().with_safety(SafetyRequirements::with_rules(["pii"]));

    let result = engine
        .execute_graph(linear_graph(&["a", "b"]), Some(config), Map::new())
        .await
        .unwrap();

    assert_eq!(result.output["a"], json!("[REDACTED]"));
    assert_eq!(result.results["a"].result, Some(json!({"ssn": "123-45-6789"})));
    assert_eq!(validator.outputs().len(), 1);
}

#[tokio::test]
async fn test_event_sequence_for_linear_run() {
    let agent = Arc::new(ScriptedAgent::new());
    let sink = Arc::new(CollectingEventSink::new());
    let engine = ExecutionEngine::builder(agent)
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    let result = engine
        .execute_graph(linear_graph(&["a", "b"]), None, Map::new())
        .await
        .unwrap();

    assert_eq!(
        sink.event_types(),
        vec![
            "execution.started",
            "node.started",
            "node.completed",
            "node.started",
            "node.completed",
            "execution.finished",
        ]
    );
    let finished = sink.events_of_type("execution.finished");
    assert_eq!(finished[0].execution_id, result.execution_id);
    assert_eq!(finished[0].get("status"), Some(&json!("completed")));
}

#[tokio::test]
async fn test_cancel_running_execution() {
    let agent = Arc::new(ScriptedAgent::new().with_delay("b", Duration::from_secs(10)));
    let engine = Arc::new(
        ExecutionEngine::builder(agent.clone())
            .with_config(ExecutionConfig::default().with_cancel_grace_ms(50))
            .build()
            .unwrap(),
    );

    let handle = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .execute_graph(linear_graph(&["a", "b", "c"]), None, Map::new())
                .await
        })
    };

    wait_until(|| agent.call_count("b") == 1).await;
    let execution_id = engine.active_executions().remove(0);

    let cancelled = engine
        .cancel_execution(&execution_id, "operator abort")
        .await
        .unwrap();
    let finished = handle.await.unwrap().unwrap();

    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert_eq!(finished.status, ExecutionStatus::Cancelled);
    assert_eq!(finished.completed_nodes, ids(&["a"]));
    assert_eq!(agent.call_count("c"), 0);

    let state = engine.get_execution(&execution_id).await.unwrap();
    assert_eq!(state.cancelled_reason.as_deref(), Some("operator abort"));
    assert!(state.cancelled_at.is_some());
    assert!(engine.active_executions().is_empty());
}

#[tokio::test]
async fn test_cancel_paused_execution() {
    let agent = Arc::new(ScriptedAgent::new());
    let sink = Arc::new(CollectingEventSink::new());
    let engine = ExecutionEngine::builder(agent.clone())
        .with_event_sink(sink.clone())
        .build()
        .unwrap();

    let paused = engine
        .execute_graph(approval_graph(), None, Map::new())
        .await
        .unwrap();
    let id = paused.execution_id.as_str();

    let cancelled = engine.cancel_execution(id, "no longer needed").await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(cancelled.paused_at_node.is_none());
    assert_eq!(sink.events_of_type("execution.cancelled").len(), 1);

    let again = engine.cancel_execution(id, "twice").await.unwrap();
    assert_eq!(again.status, ExecutionStatus::Cancelled);
    let state = engine.get_execution(id).await.unwrap();
    assert_eq!(state.cancelled_reason.as_deref(), Some("no longer needed"));

    let err = assert_err!(engine.resume(id, ApprovalDecision::Approved, None).await);
    assert!(matches!(err, EngineError::InvalidState { .. }));
    assert_eq!(agent.call_count("publish"), 0);
}

#[tokio::test]
async fn test_cancel_finished_execution_is_rejected() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);

    let done = engine
        .execute_graph(linear_graph(&["a"]), None, Map::new())
        .await
        .unwrap();

    let err = assert_err!(engine.cancel_execution(&done.execution_id, "late").await);
    assert!(matches!(
        err,
        EngineError::InvalidState {
            operation: "cancel",
            ..
        }
    ));
    let err = assert_err!(engine.cancel_execution("unknown", "nope").await);
    assert!(matches!(err, EngineError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_config_is_stored_with_state() {
    let agent = Arc::new(ScriptedAgent::new());
    let engine = engine_with(&agent);
    let config = ExecutionConfig::default().with_max_parallel(1);

    let paused = engine
        .execute_graph(approval_graph(), Some(config.clone()), Map::new())
        .await
        .unwrap();
    let state = engine.get_execution(&paused.execution_id).await.unwrap();

    assert_eq!(state.config, config);
}
