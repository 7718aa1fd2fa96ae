// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the agentrun CLI

pub mod config;
pub mod replay;
pub mod tools;

pub use self::config::ConfigCommand;
pub use self::replay::ReplayArgs;
pub use self::tools::ToolsCommand;
