// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent run orchestration core
//!
//! Tracks agent runs and their tasks from lifecycle events, gates final
//! outputs on per-domain JSON schemas, and exposes role-scoped SQL tools
//! through a manifest-driven gateway. Every tool call and lifecycle change
//! lands in a hash-chained, PII-redacted audit trail.
//!
//! # Architecture
//!
//! - `domain`: aggregates, value objects and collaborator contracts
//! - `application`: run service, job processor, tool gateway and registry
//! - `infrastructure`: Postgres and in-memory adapters, loaders, queue

pub mod application;
pub mod domain;
pub mod infrastructure;
