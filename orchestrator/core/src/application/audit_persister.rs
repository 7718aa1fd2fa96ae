// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Audit Persister Application Service
//!
//! Subscribes to the audit trail and persists every sealed entry to the
//! [`AuditLogRepository`].
//!
//! The trail notifies subscribers synchronously, so the subscriber half
//! only pushes onto an unbounded channel; a background task drains it and
//! performs the async writes. Persist failures are logged and counted,
//! never propagated back to the emitter.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::audit::AuditEntry;
use crate::domain::repository::AuditLogRepository;
use crate::infrastructure::audit_trail::{AuditSubscriber, AuditTrail, Subscription};

struct ChannelSubscriber {
    sender: mpsc::UnboundedSender<AuditEntry>,
}

impl AuditSubscriber for ChannelSubscriber {
    fn on_event(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        self.sender
            .send(entry.clone())
            .map_err(|_| anyhow::anyhow!("audit persister has shut down"))
    }
}

pub struct AuditPersister {
    repository: Arc<dyn AuditLogRepository>,
}

/// Running persister. Dropping it keeps the background task alive until the
/// subscription is removed and the trail is dropped.
pub struct AuditPersisterHandle {
    subscription: Subscription,
    task: JoinHandle<()>,
}

impl AuditPersisterHandle {
    /// Stop receiving new entries and wait until the queued ones are written.
    pub async fn shutdown(self) {
        self.subscription.unsubscribe();
        if let Err(e) = self.task.await {
            error!(error = %e, "Audit persister task panicked");
        }
    }
}

impl AuditPersister {
    pub fn new(repository: Arc<dyn AuditLogRepository>) -> Self {
        Self { repository }
    }

    /// Register on `trail` and spawn the background persistence task.
    pub fn start(self, trail: &AuditTrail) -> AuditPersisterHandle {
        info!("Starting audit persister background task");

        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEntry>();
        let subscription = trail.on_event(ChannelSubscriber { sender });
        let repository = self.repository;

        let task = tokio::spawn(async move {
            let mut persisted = 0u64;
            let mut errors = 0u64;

            while let Some(entry) = receiver.recv().await {
                match repository.append(&entry).await {
                    Ok(()) => {
                        persisted += 1;
                        if persisted % 100 == 0 {
                            debug!("Audit persister wrote {} entries ({} errors)", persisted, errors);
                        }
                    }
                    Err(e) => {
                        errors += 1;
                        metrics::counter!("agentrun_best_effort_failures_total", "effect" => "audit_persist")
                            .increment(1);
                        error!(sequence = entry.sequence, error = %e, "Failed to persist audit entry");
                        if errors % 10 == 0 {
                            warn!("Audit persistence has failed {} times", errors);
                        }
                    }
                }
            }

            info!(
                "Audit persister shut down (persisted {} entries, {} errors)",
                persisted, errors
            );
        });

        AuditPersisterHandle { subscription, task }
    }
}
