// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Call convention for side effects that must not decide the outcome of the
//! operation that triggers them.
//!
//! Primary effects are awaited with `?` like any other fallible call. A
//! best-effort effect goes through [`best_effort`]: it is awaited, and a
//! failure is logged and counted under `agentrun_best_effort_failures_total`
//! but never returned.

use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Await `effect` and swallow its error. Returns the value on success.
pub async fn best_effort<T, E, F>(name: &'static str, effect: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match effect.await {
        Ok(value) => Some(value),
        Err(e) => {
            metrics::counter!("agentrun_best_effort_failures_total", "effect" => name).increment(1);
            warn!(effect = name, error = %e, "Best-effort effect failed");
            None
        }
    }
}
