// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Records
//!
//! [`AuditEntry`] is what the audit trail hands to subscribers: the
//! (already redacted) [`AgentEvent`] wrapped in a SHA-256 hash chain.
//! Each entry commits to its sequence number, the previous entry's hash and
//! the serialized event, so deleting, reordering or editing a stored entry
//! breaks verification from that point on.
//!
//! [`ToolCallAudit`] is the payload shape of `tool.called` events emitted by
//! the tool registry and the tool gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::events::AgentEvent;

/// Hash used as `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub event: AgentEvent,
    pub prev_hash: String,
    pub hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn seal(sequence: u64, prev_hash: &str, event: AgentEvent) -> Result<Self, serde_json::Error> {
        let hash = compute_hash(sequence, prev_hash, &event)?;
        Ok(Self {
            sequence,
            event,
            prev_hash: prev_hash.to_string(),
            hash,
            recorded_at: Utc::now(),
        })
    }

    pub fn verify(&self) -> bool {
        compute_hash(self.sequence, &self.prev_hash, &self.event)
            .map(|h| h == self.hash)
            .unwrap_or(false)
    }
}

fn compute_hash(sequence: u64, prev_hash: &str, event: &AgentEvent) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(event)?;
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("entry {sequence} hash does not match its contents")]
    Tampered { sequence: u64 },

    #[error("entry {sequence} does not link to the previous entry")]
    Broken { sequence: u64 },
}

/// Verify a contiguous slice of entries, oldest first.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), ChainError> {
    for (i, entry) in entries.iter().enumerate() {
        if !entry.verify() {
            return Err(ChainError::Tampered { sequence: entry.sequence });
        }
        if i > 0 {
            let prev = &entries[i - 1];
            if entry.prev_hash != prev.hash || entry.sequence != prev.sequence + 1 {
                return Err(ChainError::Broken { sequence: entry.sequence });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
        }
    }
}

/// Payload of a `tool.called` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallAudit {
    /// Caller role, or `unknown` when the request named an invalid role.
    pub role: String,
    /// Tool name, or `unknown` when the request was rejected before lookup.
    pub resource: String,
    /// Leading SQL keyword of the template (`select`, `insert`, ...), or
    /// `invoke` for registry tools.
    pub verb: String,
    pub status: AuditStatus,
    /// Validated parameters only; never the raw request.
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub duration_ms: u64,
}

impl ToolCallAudit {
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}
