// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! agentrun CLI library - exposes testable components

pub mod commands;
pub mod embedded;
