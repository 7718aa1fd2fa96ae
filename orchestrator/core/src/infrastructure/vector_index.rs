// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Vector index adapters for task embeddings.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::collaborators::{VectorIndex, VectorIndexError, VectorRecord};

/// Keeps the latest record per id. Upserting the same id replaces it.
#[derive(Clone, Default)]
pub struct InMemoryVectorIndex {
    records: Arc<RwLock<HashMap<String, VectorRecord>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError> {
        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

/// Client for HTTP vector stores exposing `POST {endpoint}/vectors/upsert`.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    endpoint: String,
    namespace: Option<String>,
    api_key: Option<String>,
}

impl HttpVectorIndex {
    pub fn new(endpoint: String, namespace: Option<String>, api_key: Option<String>) -> Result<Self, VectorIndexError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            endpoint,
            namespace,
            api_key,
        })
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorIndexError> {
        let url = format!("{}/vectors/upsert", self.endpoint.trim_end_matches('/'));
        let body = UpsertRequest {
            vectors: &records,
            namespace: self.namespace.as_deref(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Api-Key", key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorIndexError::Rejected { status, body });
        }
        debug!(count = records.len(), "Upserted vectors");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let index = InMemoryVectorIndex::new();
        let record = |v: f32| VectorRecord {
            id: "run:task".into(),
            values: vec![v, v],
            metadata: json!({}),
        };
        index.upsert(vec![record(0.1)]).await.unwrap();
        index.upsert(vec![record(0.2)]).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("run:task").unwrap().values, vec![0.2, 0.2]);
    }

    #[tokio::test]
    async fn test_http_index_unreachable_endpoint_is_request_error() {
        let index = HttpVectorIndex::new("http://127.0.0.1:9".into(), None, None).unwrap();
        let err = index.upsert(vec![]).await.unwrap_err();
        assert!(matches!(err, VectorIndexError::Request(_)));
    }
}
