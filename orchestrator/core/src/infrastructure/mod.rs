// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod audit_trail;
pub mod event_queue;
pub mod credentials;
pub mod sql_executor;
pub mod vector_index;
pub mod manifest_loader;
pub mod schema_loader;

pub use audit_trail::{AuditSubscriber, AuditTrail, Subscription};
pub use event_queue::InMemoryEventQueue;
