// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the run lifecycle: events pushed through the
//! in-memory queue, applied by the job processor and persisted by the
//! run service.

use agentrun_core::application::agent_run_service::{AgentRunService, RunServiceError};
use agentrun_core::application::job_processor::AgentJobProcessor;
use agentrun_core::application::tool_registry::ToolRegistry;
use agentrun_core::domain::events::{AgentEvent, AgentEventType};
use agentrun_core::domain::run::{RunFailure, RunId, RunStatus};
use agentrun_core::domain::schema::DomainSchemaRegistry;
use agentrun_core::domain::tool::{ToolContext, ToolDefinition};
use agentrun_core::infrastructure::audit_trail::{AuditTrail, RecordingSubscriber};
use agentrun_core::infrastructure::event_queue::InMemoryEventQueue;
use agentrun_core::infrastructure::repositories::InMemoryAgentRunRepository;
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    service: Arc<AgentRunService>,
    queue: Arc<InMemoryEventQueue>,
    processor: AgentJobProcessor,
    audit: AuditTrail,
    probe: RecordingSubscriber,
}

fn harness() -> Harness {
    let schemas = Arc::new(DomainSchemaRegistry::new());
    schemas
        .register(
            "events",
            &json!({
                "type": "object",
                "required": ["title", "capacity"],
                "properties": {
                    "title": {"type": "string"},
                    "capacity": {"type": "integer", "minimum": 1}
                }
            }),
        )
        .unwrap();

    let audit = AuditTrail::default();
    let probe = RecordingSubscriber::new();
    audit.on_event(probe.clone());

    let service = Arc::new(AgentRunService::new(
        Arc::new(InMemoryAgentRunRepository::new()),
        schemas,
        audit.clone(),
    ));
    let queue = Arc::new(InMemoryEventQueue::new(64));
    let processor = AgentJobProcessor::new(service.clone(), queue.clone());
    Harness {
        service,
        queue,
        processor,
        audit,
        probe,
    }
}

fn task_updated(run_id: RunId) -> AgentEvent {
    AgentEvent::for_run(
        AgentEventType::TaskUpdated,
        run_id,
        json!({"task": {
            "id": "venue-search",
            "name": "Search venues",
            "input": {"city": "Lisbon"},
            "status": "succeeded",
            "createdAt": "2026-04-02T08:00:00Z",
            "updatedAt": "2026-04-02T08:03:12Z",
            "metadata": {"output": {"venues": 3}}
        }}),
    )
}

fn run_completed(run_id: RunId) -> AgentEvent {
    AgentEvent::for_run(
        AgentEventType::RunCompleted,
        run_id,
        json!({"domain": "events", "output": {"title": "Spring gala", "capacity": 120}}),
    )
}

#[tokio::test]
async fn test_duplicate_delivery_leaves_run_byte_identical() {
    let h = harness();
    let run = h.service.create_run("planner", "acme", "events", json!({"prompt": "gala"})).await.unwrap();

    h.processor.start().await.unwrap();
    h.queue.publish(task_updated(run.id)).await.unwrap();
    h.queue.publish(run_completed(run.id)).await.unwrap();
    h.processor.stop().await.unwrap();

    let after_first = h.service.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(after_first.status, RunStatus::Succeeded);
    let first_bytes = serde_json::to_vec(&after_first).unwrap();

    h.processor.start().await.unwrap();
    h.queue.publish(task_updated(run.id)).await.unwrap();
    h.queue.publish(run_completed(run.id)).await.unwrap();
    h.processor.stop().await.unwrap();

    let after_replay = h.service.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(serde_json::to_vec(&after_replay).unwrap(), first_bytes);

    // created, updated, completed: duplicates add no audit records
    assert_eq!(h.probe.len(), 3);
}

#[tokio::test]
async fn test_failure_after_success_is_surfaced() {
    let h = harness();
    let run = h.service.create_run("planner", "acme", "events", json!({})).await.unwrap();
    h.service
        .finalize_run(run.id, json!({"title": "Gala", "capacity": 10}), "events")
        .await
        .unwrap();

    let err = h
        .service
        .fail_run(
            run.id,
            RunFailure {
                message: "worker crashed".into(),
                trace: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunServiceError::AlreadyTerminal {
            status: RunStatus::Succeeded,
            ..
        }
    ));

    let stored = h.service.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Succeeded);
    assert!(stored.error.is_none());
}

#[tokio::test]
async fn test_rejected_output_does_not_change_persisted_run() {
    let h = harness();
    let run = h.service.create_run("planner", "acme", "events", json!({})).await.unwrap();
    let before = serde_json::to_vec(&h.service.get_run(run.id).await.unwrap().unwrap()).unwrap();

    let err = h
        .service
        .finalize_run(run.id, json!({"title": "Gala", "capacity": 0}), "events")
        .await
        .unwrap_err();
    assert!(matches!(err, RunServiceError::DomainValidation { .. }));

    let after = serde_json::to_vec(&h.service.get_run(run.id).await.unwrap().unwrap()).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_handler_error_does_not_stop_the_queue() {
    let h = harness();
    let first = h.service.create_run("planner", "acme", "events", json!({})).await.unwrap();
    let second = h.service.create_run("planner", "acme", "events", json!({})).await.unwrap();

    h.processor.start().await.unwrap();
    // Unknown run, then an invalid output, then a valid event
    h.queue.publish(task_updated(RunId::new())).await.unwrap();
    h.queue
        .publish(AgentEvent::for_run(
            AgentEventType::RunCompleted,
            first.id,
            json!({"output": {"title": 42}}),
        ))
        .await
        .unwrap();
    h.queue.publish(task_updated(second.id)).await.unwrap();
    h.processor.stop().await.unwrap();

    assert_eq!(h.service.get_run(first.id).await.unwrap().unwrap().status, RunStatus::Pending);
    assert_eq!(h.service.get_run(second.id).await.unwrap().unwrap().status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_registry_tool_calls_are_audited_against_the_run() {
    let h = harness();
    let run = h.service.create_run("planner", "acme", "events", json!({})).await.unwrap();

    let registry = ToolRegistry::default();
    registry
        .register(ToolDefinition::new(
            "notify_guest",
            "Sends a confirmation to a guest",
            json!({"type": "object", "required": ["email"], "properties": {"email": {"type": "string"}}}),
            json!({"type": "object"}),
            |input: Value, _ctx: ToolContext| async move { Ok::<_, anyhow::Error>(json!({"sent_to": input["email"]})) },
        ))
        .unwrap();

    let ctx = h.service.tool_context(run.id, "venue-search");
    registry
        .invoke("notify_guest", json!({"email": "maria.silva@example.pt"}), &ctx)
        .await
        .unwrap();

    let entries = h.probe.entries();
    let call = entries
        .iter()
        .find(|e| e.event.event_type == AgentEventType::ToolCalled)
        .unwrap();
    assert_eq!(call.event.run_id, Some(run.id));
    assert_eq!(call.event.payload["task_id"], "venue-search");
    assert_eq!(call.event.payload["params"]["email"], "[REDACTED]");
    let serialized = serde_json::to_string(&call.event).unwrap();
    assert!(!serialized.contains("maria.silva"));
    assert!(AuditTrail::verify_chain(&entries).is_ok());
    assert_eq!(h.audit.subscriber_count(), 1);
}
