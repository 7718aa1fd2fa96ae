// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedded orchestrator
//!
//! Builds the run service, job processor and audit trail in-process from an
//! [`OrchestratorConfig`]. Runs and audit entries go to PostgreSQL when
//! `spec.database.url` is set and stay in memory otherwise; the queue is
//! always in-process.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;

use agentrun_core::application::audit_persister::{AuditPersister, AuditPersisterHandle};
use agentrun_core::application::repository_factory::{create_agent_run_repository, create_audit_log_repository};
use agentrun_core::application::{AgentJobProcessor, AgentRunService};
use agentrun_core::domain::audit::AuditEntry;
use agentrun_core::domain::events::AgentEvent;
use agentrun_core::domain::orchestrator_config::OrchestratorConfig;
use agentrun_core::domain::repository::AuditLogRepository;
use agentrun_core::domain::run::{AgentRun, RunId};
use agentrun_core::domain::schema::DomainSchemaRegistry;
use agentrun_core::infrastructure::audit_trail::AuditTrail;
use agentrun_core::infrastructure::db::Database;
use agentrun_core::infrastructure::event_queue::InMemoryEventQueue;
use agentrun_core::infrastructure::schema_loader::load_domain_schemas;
use agentrun_core::infrastructure::vector_index::HttpVectorIndex;

pub struct EmbeddedOrchestrator {
    service: Arc<AgentRunService>,
    processor: AgentJobProcessor,
    queue: Arc<InMemoryEventQueue>,
    audit_log: Arc<dyn AuditLogRepository>,
    persister: AuditPersisterHandle,
    /// Run ids as they appear in replayed input → ids allocated by the service
    run_ids: HashMap<RunId, RunId>,
}

impl EmbeddedOrchestrator {
    pub async fn new(config: &OrchestratorConfig) -> Result<Self> {
        let pool = match &config.spec.database.url {
            Some(url) => {
                let database = Database::new(url).await?;
                database.ensure_schema().await?;
                tracing::info!("Using PostgreSQL repositories");
                Some(database.get_pool().clone())
            }
            None => None,
        };

        let audit_log = create_audit_log_repository(pool.clone());
        let tail = audit_log
            .list_recent(1)
            .await
            .context("Failed to read the audit chain tail")?;
        let audit = AuditTrail::resume(config.spec.audit.build_redactor()?, tail.last());
        let persister = AuditPersister::new(audit_log.clone()).start(&audit);

        let schemas = Arc::new(DomainSchemaRegistry::new());
        if let Some(dir) = &config.spec.runs.domain_schema_dir {
            let loaded = load_domain_schemas(dir, &schemas)
                .with_context(|| format!("Failed to load domain schemas from {:?}", dir))?;
            tracing::info!(loaded, "Loaded domain schemas");
        }

        let mut service = AgentRunService::new(create_agent_run_repository(pool), schemas, audit)
            .with_list_limit(config.spec.runs.list_limit);
        if let Some(vector) = &config.spec.vector_index {
            let api_key = vector.api_key_env.as_ref().and_then(|var| std::env::var(var).ok());
            let index = HttpVectorIndex::new(vector.endpoint.clone(), vector.namespace.clone(), api_key)
                .context("Failed to build vector index client")?;
            service = service.with_vector_index(Arc::new(index));
        }
        let service = Arc::new(service);

        let queue = Arc::new(InMemoryEventQueue::new(config.spec.queue.capacity));
        let processor = AgentJobProcessor::new(service.clone(), queue.clone());

        Ok(Self {
            service,
            processor,
            queue,
            audit_log,
            persister,
            run_ids: HashMap::new(),
        })
    }

    pub fn service(&self) -> &AgentRunService {
        &self.service
    }

    pub async fn start(&self) -> Result<()> {
        self.processor.start().await
    }

    /// Create a run for an id used by the replayed input.
    pub async fn create_run(
        &mut self,
        external_id: RunId,
        agent_id: &str,
        project_id: &str,
        domain: &str,
        input: serde_json::Value,
    ) -> Result<AgentRun> {
        let run = self.service.create_run(agent_id, project_id, domain, input).await?;
        self.run_ids.insert(external_id, run.id);
        Ok(run)
    }

    /// Publish a lifecycle event, translating its run id.
    pub async fn publish(&self, mut event: AgentEvent) -> Result<()> {
        if let Some(id) = event.run_id {
            event.run_id = Some(self.run_ids.get(&id).copied().unwrap_or(id));
        }
        self.queue.publish(event).await?;
        Ok(())
    }

    /// Drain the queue and the audit persister, then return every run in
    /// replay order together with the persisted audit entries.
    pub async fn finish(self) -> Result<(Vec<(RunId, AgentRun)>, Vec<AuditEntry>)> {
        self.processor.stop().await?;

        let mut runs = Vec::with_capacity(self.run_ids.len());
        for (external, internal) in &self.run_ids {
            if let Some(run) = self.service.get_run(*internal).await? {
                runs.push((*external, run));
            }
        }
        runs.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at));

        // The service still holds the trail; unsubscribe so the persister drains
        self.persister.shutdown().await;
        let entries = self.audit_log.list_recent(usize::MAX).await?;
        Ok((runs, entries))
    }
}
