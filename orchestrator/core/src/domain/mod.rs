// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, value objects and the contracts of every
//! collaborator the application layer depends on.

pub mod audit;
pub mod collaborators;
pub mod events;
pub mod manifest;
pub mod orchestrator_config;
pub mod parameters;
pub mod redaction;
pub mod repository;
pub mod run;
pub mod schema;
pub mod template;
pub mod tool;
