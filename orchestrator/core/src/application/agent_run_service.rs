// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Run Service
//!
//! Owns the run/task state machine on top of [`AgentRunRepository`].
//!
//! Every mutation follows the same shape: load the run, apply the input to
//! the aggregate, and persist with a compare-and-set on the version that
//! was read. A version conflict reloads and reapplies. An input that leaves
//! the aggregate unchanged is not persisted at all, which is what makes
//! redelivered lifecycle events converge on the state of a single delivery.
//!
//! Persisting the run is the primary effect. The vector upsert and the
//! per-run event log are best-effort (see [`crate::application::effects`]).

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::effects::best_effort;
use crate::domain::collaborators::{VectorIndex, VectorRecord};
use crate::domain::events::{AgentEvent, AgentEventType};
use crate::domain::repository::{AgentRunRepository, RepositoryError, RunPatch};
use crate::domain::run::{AgentRun, Applied, RunFailure, RunId, RunStatus, Task, TaskUpdate, TerminalStateError};
use crate::domain::schema::{DomainSchemaRegistry, SchemaError};
use crate::domain::tool::ToolContext;
use crate::infrastructure::audit_trail::AuditTrail;

pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Reload-and-reapply attempts after a version conflict.
const MAX_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum RunServiceError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("invalid task for run {run_id}: {message}")]
    TaskValidation { run_id: RunId, message: String },

    #[error("final output rejected for domain '{domain}': {source}")]
    DomainValidation {
        domain: String,
        #[source]
        source: SchemaError,
    },

    #[error("run {run_id} is already {status}")]
    AlreadyTerminal { run_id: RunId, status: RunStatus },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<TerminalStateError> for RunServiceError {
    fn from(err: TerminalStateError) -> Self {
        RunServiceError::AlreadyTerminal {
            run_id: err.run_id,
            status: err.status,
        }
    }
}

pub struct AgentRunService {
    repo: Arc<dyn AgentRunRepository>,
    schemas: Arc<DomainSchemaRegistry>,
    audit: AuditTrail,
    vector_index: Option<Arc<dyn VectorIndex>>,
    list_limit: usize,
}

impl AgentRunService {
    pub fn new(repo: Arc<dyn AgentRunRepository>, schemas: Arc<DomainSchemaRegistry>, audit: AuditTrail) -> Self {
        Self {
            repo,
            schemas,
            audit,
            vector_index: None,
            list_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    pub async fn create_run(
        &self,
        agent_id: &str,
        project_id: &str,
        domain: &str,
        input: Value,
    ) -> Result<AgentRun, RunServiceError> {
        let run = AgentRun::new(agent_id, project_id, domain, input);
        let run = self.repo.create_run(&run).await?;
        info!(run_id = %run.id, agent_id, project_id, domain, "Created agent run");

        self.publish(AgentEvent::for_run(
            AgentEventType::TaskCreated,
            run.id,
            json!({
                "agent_id": run.agent_id,
                "project_id": run.project_id,
                "domain": run.metadata.domain,
                "status": run.status,
            }),
        ))
        .await;
        Ok(run)
    }

    /// Merge a raw task payload into the run by task id.
    pub async fn record_task_result(&self, run_id: RunId, raw: Value) -> Result<AgentRun, RunServiceError> {
        let update: TaskUpdate = serde_json::from_value(raw).map_err(|e| RunServiceError::TaskValidation {
            run_id,
            message: e.to_string(),
        })?;
        update
            .validate()
            .map_err(|message| RunServiceError::TaskValidation { run_id, message })?;

        let task_id = update.id.clone();
        let (run, applied) = self
            .mutate(run_id, |run, now| {
                let task = update.clone().into_task(run.task(&update.id), now);
                Ok(run.merge_task(task, now))
            })
            .await?;
        if applied == Applied::Unchanged {
            debug!(run_id = %run_id, task_id = %task_id, "Task update already applied");
            return Ok(run);
        }

        let Some(task) = run.task(&task_id).cloned() else {
            return Ok(run);
        };
        info!(run_id = %run_id, task_id = %task.id, task_status = %task.status, run_status = %run.status, "Recorded task result");

        self.upsert_embedding(&run, &task).await;
        self.publish(AgentEvent::for_run(
            AgentEventType::TaskUpdated,
            run_id,
            json!({ "task": task, "run_status": run.status }),
        ))
        .await;
        Ok(run)
    }

    /// Validate `output` against the schema registered for `domain` and
    /// mark the run succeeded. A rejected output leaves the run untouched.
    pub async fn finalize_run(&self, run_id: RunId, output: Value, domain: &str) -> Result<AgentRun, RunServiceError> {
        let (run, applied) = self
            .mutate(run_id, |run, now| {
                self.schemas
                    .validate(domain, &output)
                    .map_err(|source| RunServiceError::DomainValidation {
                        domain: domain.to_string(),
                        source,
                    })?;
                Ok(run.finalize(output.clone(), now)?)
            })
            .await?;
        if applied == Applied::Unchanged {
            debug!(run_id = %run_id, "Run already finalized with this output");
            return Ok(run);
        }

        info!(run_id = %run_id, domain, "Run completed");
        self.publish(AgentEvent::for_run(
            AgentEventType::RunCompleted,
            run_id,
            json!({ "domain": domain, "output": run.final_output }),
        ))
        .await;
        Ok(run)
    }

    pub async fn fail_run(&self, run_id: RunId, failure: RunFailure) -> Result<AgentRun, RunServiceError> {
        let (run, applied) = self
            .mutate(run_id, |run, now| Ok(run.fail(failure.clone(), now)?))
            .await?;
        if applied == Applied::Unchanged {
            debug!(run_id = %run_id, "Run already failed with this error");
            return Ok(run);
        }

        warn!(run_id = %run_id, error = %failure.message, "Run failed");
        self.publish(AgentEvent::for_run(
            AgentEventType::RunFailed,
            run_id,
            json!({ "error": run.error }),
        ))
        .await;
        Ok(run)
    }

    pub async fn list_runs(&self, project_id: &str) -> Result<Vec<AgentRun>, RunServiceError> {
        Ok(self.repo.list_runs(project_id, self.list_limit).await?)
    }

    /// `Ok(None)` when no run has this id.
    pub async fn get_run(&self, run_id: RunId) -> Result<Option<AgentRun>, RunServiceError> {
        Ok(self.repo.get_run(run_id).await?)
    }

    pub async fn list_events(&self, run_id: RunId) -> Result<Vec<AgentEvent>, RunServiceError> {
        Ok(self.repo.list_events(run_id).await?)
    }

    /// Invocation context for a tool called from one of the run's tasks.
    pub fn tool_context(&self, run_id: RunId, task_id: &str) -> ToolContext {
        ToolContext::new(Some(run_id), Some(task_id.to_string()), self.audit.callback())
    }

    async fn load(&self, run_id: RunId) -> Result<AgentRun, RunServiceError> {
        self.repo
            .get_run(run_id)
            .await?
            .ok_or(RunServiceError::RunNotFound(run_id))
    }

    /// Load, apply and compare-and-set. Unchanged runs are not written.
    async fn mutate<F>(&self, run_id: RunId, mut apply: F) -> Result<(AgentRun, Applied), RunServiceError>
    where
        F: FnMut(&mut AgentRun, DateTime<Utc>) -> Result<Applied, RunServiceError>,
    {
        let mut conflicts = 0;
        loop {
            let mut run = self.load(run_id).await?;
            let expected_version = run.version;
            let previous_status = run.status;

            if apply(&mut run, Utc::now())? == Applied::Unchanged {
                return Ok((run, Applied::Unchanged));
            }

            match self.repo.update_run(run_id, RunPatch::from_run(&run, expected_version)).await {
                Ok(saved) => {
                    if saved.status != previous_status {
                        metrics::counter!("agentrun_run_transitions_total", "status" => saved.status.as_str())
                            .increment(1);
                    }
                    return Ok((saved, Applied::Changed));
                }
                Err(RepositoryError::Conflict { expected, actual, .. }) if conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    warn!(run_id = %run_id, expected, actual, attempt = conflicts, "Run version conflict, reapplying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn upsert_embedding(&self, run: &AgentRun, task: &Task) {
        let (Some(index), Some(values)) = (&self.vector_index, task.embedding()) else {
            return;
        };
        let record = VectorRecord {
            id: format!("{}:{}", run.id, task.id),
            values,
            metadata: json!({
                "run_id": run.id,
                "task_id": task.id,
                "task_name": task.name,
                "project_id": run.project_id,
                "domain": run.metadata.domain,
            }),
        };
        best_effort("vector_upsert", index.upsert(vec![record])).await;
    }

    /// Redact, append to the run's event log, then emit to the audit trail.
    async fn publish(&self, mut event: AgentEvent) {
        event.payload = self.audit.redactor().redact(&event.payload);
        if let Some(run_id) = event.run_id {
            best_effort("append_event", self.repo.append_event(run_id, &event)).await;
        }
        self.audit.record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::collaborators::VectorIndexError;
    use crate::infrastructure::audit_trail::RecordingSubscriber;
    use crate::infrastructure::repositories::InMemoryAgentRunRepository;
    use crate::infrastructure::vector_index::InMemoryVectorIndex;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Fixture {
        service: AgentRunService,
        repo: Arc<InMemoryAgentRunRepository>,
        probe: RecordingSubscriber,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAgentRunRepository::new());
        let schemas = Arc::new(DomainSchemaRegistry::new());
        schemas
            .register(
                "events",
                &json!({
                    "type": "object",
                    "required": ["title"],
                    "properties": {"title": {"type": "string"}}
                }),
            )
            .unwrap();
        let audit = AuditTrail::default();
        let probe = RecordingSubscriber::new();
        audit.on_event(probe.clone());
        Fixture {
            service: AgentRunService::new(repo.clone(), schemas, audit),
            repo,
            probe,
        }
    }

    fn task(id: &str, status: &str) -> Value {
        json!({
            "id": id,
            "name": format!("task {id}"),
            "input": {"q": id},
            "status": status,
            "createdAt": "2026-03-01T10:00:00Z",
            "updatedAt": "2026-03-01T10:05:00Z",
        })
    }

    #[tokio::test]
    async fn test_create_run_is_pending_and_audited() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({"prompt": "gala"})).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.tasks.is_empty());

        let entries = f.probe.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_type, AgentEventType::TaskCreated);
        assert_eq!(f.service.list_events(run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_update_is_a_no_op() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let first = f.service.record_task_result(run.id, task("a", "running")).await.unwrap();
        let second = f.service.record_task_result(run.id, task("a", "running")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.tasks.len(), 1);
        assert_eq!(second.version, 1);
        assert_eq!(f.probe.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_without_timestamps_keeps_first_values() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        let raw = json!({"id": "a", "name": "lookup", "status": "running"});

        let first = f.service.record_task_result(run.id, raw.clone()).await.unwrap();
        let second = f.service.record_task_result(run.id, raw).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_run_succeeds_when_all_tasks_succeeded() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        f.service.record_task_result(run.id, task("a", "succeeded")).await.unwrap();
        let run = f.service.record_task_result(run.id, task("b", "running")).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.tasks.len(), 2);

        let other = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        f.service.record_task_result(other.id, task("a", "running")).await.unwrap();
        let other = f.service.record_task_result(other.id, task("b", "succeeded")).await.unwrap();
        assert_eq!(other.status, RunStatus::Pending);
        let other = f.service.record_task_result(other.id, task("a", "succeeded")).await.unwrap();
        assert_eq!(other.status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_task_rejected() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let missing_status = json!({"id": "a", "name": "x"});
        assert!(matches!(
            f.service.record_task_result(run.id, missing_status).await,
            Err(RunServiceError::TaskValidation { .. })
        ));
        let empty_id = json!({"id": " ", "name": "x", "status": "running"});
        assert!(matches!(
            f.service.record_task_result(run.id, empty_id).await,
            Err(RunServiceError::TaskValidation { .. })
        ));
        assert!(f.service.get_run(run.id).await.unwrap().unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let f = fixture();
        let missing = RunId::new();
        assert!(matches!(
            f.service.record_task_result(missing, task("a", "running")).await,
            Err(RunServiceError::RunNotFound(id)) if id == missing
        ));
        assert!(matches!(
            f.service.finalize_run(missing, json!({"title": "x"}), "events").await,
            Err(RunServiceError::RunNotFound(_))
        ));
        assert!(f.service.get_run(missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_domain_validation_does_not_mutate() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let err = f.service.finalize_run(run.id, json!({"venue": 3}), "events").await.unwrap_err();
        assert!(matches!(err, RunServiceError::DomainValidation { .. }));
        let err = f.service.finalize_run(run.id, json!({"title": "x"}), "weddings").await.unwrap_err();
        assert!(matches!(
            err,
            RunServiceError::DomainValidation { source: SchemaError::UnknownDomain(_), .. }
        ));

        let stored = f.repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored, run);
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        let output = json!({"title": "Spring gala"});

        let first = f.service.finalize_run(run.id, output.clone(), "events").await.unwrap();
        assert_eq!(first.status, RunStatus::Succeeded);
        assert!(first.completed_at.is_some());

        let second = f.service.finalize_run(run.id, output, "events").await.unwrap();
        assert_eq!(first, second);

        let err = f
            .service
            .finalize_run(run.id, json!({"title": "Other"}), "events")
            .await
            .unwrap_err();
        assert!(matches!(err, RunServiceError::AlreadyTerminal { status: RunStatus::Succeeded, .. }));
    }

    #[tokio::test]
    async fn test_fail_after_success_is_rejected() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        f.service.finalize_run(run.id, json!({"title": "x"}), "events").await.unwrap();

        let err = f
            .service
            .fail_run(run.id, RunFailure { message: "late".into(), trace: None })
            .await
            .unwrap_err();
        assert!(matches!(err, RunServiceError::AlreadyTerminal { status: RunStatus::Succeeded, .. }));
        assert_eq!(f.service.get_run(run.id).await.unwrap().unwrap().status, RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_fail_run_records_error_and_replay_is_no_op() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        let failure = RunFailure {
            message: "venue API unreachable".into(),
            trace: Some("at fetch_venues".into()),
        };

        let failed = f.service.fail_run(run.id, failure.clone()).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error.as_ref(), Some(&failure));

        let again = f.service.fail_run(run.id, failure).await.unwrap();
        assert_eq!(failed, again);
        assert!(matches!(
            f.service.finalize_run(run.id, json!({"title": "x"}), "events").await,
            Err(RunServiceError::AlreadyTerminal { status: RunStatus::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn test_embedding_upserted_under_run_and_task_id() {
        let f = fixture();
        let index = Arc::new(InMemoryVectorIndex::new());
        let service = AgentRunService::new(
            f.repo.clone(),
            Arc::new(DomainSchemaRegistry::new()),
            AuditTrail::default(),
        )
        .with_vector_index(index.clone());
        let run = service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let mut raw = task("a", "succeeded");
        raw["metadata"] = json!({"embedding": [0.1, 0.2, 0.3]});
        service.record_task_result(run.id, raw).await.unwrap();

        let record = index.get(&format!("{}:a", run.id)).unwrap();
        assert_eq!(record.values.len(), 3);
        assert_eq!(record.metadata["task_id"], "a");
    }

    struct DownIndex;

    #[async_trait]
    impl VectorIndex for DownIndex {
        async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<(), VectorIndexError> {
            Err(VectorIndexError::Request("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_vector_failure_does_not_fail_task_result() {
        let f = fixture();
        let service = AgentRunService::new(
            f.repo.clone(),
            Arc::new(DomainSchemaRegistry::new()),
            AuditTrail::default(),
        )
        .with_vector_index(Arc::new(DownIndex));
        let run = service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let mut raw = task("a", "succeeded");
        raw["metadata"] = json!({"embedding": [1.0]});
        let run = service.record_task_result(run.id, raw).await.unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
    }

    /// Bumps the stored version behind the caller's back once.
    struct RacingRepo {
        inner: InMemoryAgentRunRepository,
        raced: Mutex<bool>,
    }

    #[async_trait]
    impl AgentRunRepository for RacingRepo {
        async fn create_run(&self, run: &AgentRun) -> Result<AgentRun, RepositoryError> {
            self.inner.create_run(run).await
        }

        async fn update_run(&self, id: RunId, patch: RunPatch) -> Result<AgentRun, RepositoryError> {
            let race = std::mem::replace(&mut *self.raced.lock(), true);
            if !race {
                let current = self.inner.get_run(id).await?.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
                let mut bump = RunPatch::from_run(&current, current.version);
                bump.tasks = None;
                self.inner.update_run(id, bump).await?;
            }
            self.inner.update_run(id, patch).await
        }

        async fn append_event(&self, run_id: RunId, event: &AgentEvent) -> Result<(), RepositoryError> {
            self.inner.append_event(run_id, event).await
        }

        async fn list_runs(&self, project_id: &str, limit: usize) -> Result<Vec<AgentRun>, RepositoryError> {
            self.inner.list_runs(project_id, limit).await
        }

        async fn get_run(&self, id: RunId) -> Result<Option<AgentRun>, RepositoryError> {
            self.inner.get_run(id).await
        }

        async fn list_events(&self, run_id: RunId) -> Result<Vec<AgentEvent>, RepositoryError> {
            self.inner.list_events(run_id).await
        }
    }

    #[tokio::test]
    async fn test_run_event_log_is_redacted() {
        let f = fixture();
        let run = f.service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        let mut update = task("t1", "running");
        update["input"] = json!({"contact": "jane@example.com"});
        f.service.record_task_result(run.id, update).await.unwrap();

        let events = f.service.list_events(run.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].payload["task"]["input"]["contact"], "[REDACTED]");
        assert!(!serde_json::to_string(&events).unwrap().contains("jane@example.com"));

        // The run record itself keeps the task input
        let stored = f.service.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.tasks[0].input["contact"], "jane@example.com");
    }

    #[tokio::test]
    async fn test_version_conflict_is_reapplied() {
        let repo = Arc::new(RacingRepo {
            inner: InMemoryAgentRunRepository::new(),
            raced: Mutex::new(false),
        });
        let service = AgentRunService::new(repo, Arc::new(DomainSchemaRegistry::new()), AuditTrail::default());
        let run = service.create_run("planner", "p1", "events", json!({})).await.unwrap();

        let run = service.record_task_result(run.id, task("a", "running")).await.unwrap();
        assert_eq!(run.tasks.len(), 1);
        assert_eq!(run.version, 2);
    }

    #[tokio::test]
    async fn test_list_runs_respects_limit() {
        let f = fixture();
        let service = AgentRunService::new(
            f.repo.clone(),
            Arc::new(DomainSchemaRegistry::new()),
            AuditTrail::default(),
        )
        .with_list_limit(2);
        for _ in 0..3 {
            service.create_run("planner", "p1", "events", json!({})).await.unwrap();
        }
        service.create_run("planner", "p2", "events", json!({})).await.unwrap();
        assert_eq!(service.list_runs("p1").await.unwrap().len(), 2);
        assert_eq!(service.list_runs("p2").await.unwrap().len(), 1);
    }
}
