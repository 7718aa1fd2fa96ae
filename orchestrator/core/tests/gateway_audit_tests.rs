// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway calls against YAML manifests, with the audit trail persisted
//! through the background persister.

use agentrun_core::application::audit_persister::AuditPersister;
use agentrun_core::application::tool_gateway::{GatewayError, GatewayRequest, ToolGateway};
use agentrun_core::domain::audit::AuditEntry;
use agentrun_core::domain::collaborators::{
    Credential, ExecutorError, QueryExecutor, QueryResult, RlsContext,
};
use agentrun_core::domain::manifest::{ManifestSet, Role};
use agentrun_core::domain::repository::AuditLogRepository;
use agentrun_core::domain::template::BoundQuery;
use agentrun_core::infrastructure::audit_trail::AuditTrail;
use agentrun_core::infrastructure::credentials::StaticCredentialResolver;
use agentrun_core::infrastructure::manifest_loader::ManifestLoader;
use agentrun_core::infrastructure::repositories::InMemoryAuditLogRepository;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const ANON: &str = r#"
role: anon
tools:
  - name: list_venues
    description: Public venue listing
    template: select id, name from venues where city = :city
    params:
      - { name: city, type: string, required: true }
"#;

const AUTHENTICATED: &str = r#"
role: authenticated
tools:
  - name: create_booking
    template: insert into bookings (venue_id, total, contact) values (:venue_id, :total, :contact) returning id
    params:
      - { name: venue_id, type: uuid, required: true }
      - { name: total, type: number, required: true }
      - { name: contact, type: string }
"#;

const VENUE: &str = "0b7e4c0a-5d8e-4f7a-9b61-2f3c4d5e6f70";

#[derive(Default)]
struct CountingExecutor {
    queries: Mutex<Vec<BoundQuery>>,
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn execute(
        &self,
        _credential: &Credential,
        query: &BoundQuery,
        _rls: &RlsContext,
    ) -> Result<QueryResult, ExecutorError> {
        self.queries.lock().push(query.clone());
        Ok(QueryResult {
            rows: vec![json!({"id": 7})],
            rows_affected: 1,
        })
    }
}

fn manifests() -> Arc<ManifestSet> {
    let mut set = ManifestSet::new();
    set.insert(ManifestLoader::parse_yaml(ANON).unwrap()).unwrap();
    set.insert(ManifestLoader::parse_yaml(AUTHENTICATED).unwrap()).unwrap();
    Arc::new(set)
}

fn request(role: &str, tool: &str, params: Value) -> GatewayRequest {
    GatewayRequest {
        role: role.into(),
        tool: tool.into(),
        params: params.as_object().cloned().unwrap_or_default(),
        ..Default::default()
    }
}

async fn persisted(trail: AuditTrail, calls: Vec<GatewayRequest>, executor: Arc<CountingExecutor>) -> (Vec<Result<(), GatewayError>>, Vec<AuditEntry>) {
    let log = Arc::new(InMemoryAuditLogRepository::new());
    let persister = AuditPersister::new(log.clone()).start(&trail);

    let credentials = StaticCredentialResolver::new()
        .with(Role::Anon, "postgres://anon@db/app")
        .with(Role::Authenticated, "postgres://auth@db/app");
    let gateway = ToolGateway::new(manifests(), Arc::new(credentials), executor, trail);

    let cancel = CancellationToken::new();
    let mut outcomes = Vec::new();
    for call in calls {
        outcomes.push(gateway.execute(call, &cancel).await.map(|_| ()));
    }

    drop(gateway);
    persister.shutdown().await;
    (outcomes, log.list_recent(usize::MAX).await.unwrap())
}

#[tokio::test]
async fn test_every_attempt_is_persisted_once_in_order() {
    let executor = Arc::new(CountingExecutor::default());
    let calls = vec![
        request("anon", "list_venues", json!({"city": "Porto"})),
        request("anon", "create_booking", json!({"venue_id": VENUE, "total": 10})),
        request("authenticated", "create_booking", json!({"venue_id": VENUE, "total": 99.5})),
        request("superuser", "list_venues", json!({})),
        request("authenticated", "create_booking", json!({"venue_id": VENUE})),
    ];

    let (outcomes, entries) = persisted(AuditTrail::default(), calls, executor.clone()).await;

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 2);
    assert_eq!(entries.len(), 5);
    assert!(AuditTrail::verify_chain(&entries).is_ok());

    let codes: Vec<Value> = entries
        .iter()
        .map(|e| e.event.payload.get("error_code").cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(
        codes,
        vec![
            Value::Null,
            json!("tool_not_found"),
            Value::Null,
            json!("invalid_request"),
            json!("required_parameter_missing"),
        ]
    );
    assert_eq!(executor.queries.lock().len(), 2);
}

#[tokio::test]
async fn test_malformed_number_and_uuid_never_reach_the_database() {
    let executor = Arc::new(CountingExecutor::default());
    let calls = vec![
        request("authenticated", "create_booking", json!({"venue_id": VENUE, "total": "12abc"})),
        request("authenticated", "create_booking", json!({"venue_id": "not-a-uuid", "total": 12})),
    ];

    let (outcomes, entries) = persisted(AuditTrail::default(), calls, executor.clone()).await;

    for outcome in &outcomes {
        assert!(matches!(outcome, Err(GatewayError::TypeConversion { .. })));
    }
    assert!(executor.queries.lock().is_empty());
    assert!(entries
        .iter()
        .all(|e| e.event.payload["error_code"] == "type_conversion_error"));
}

#[tokio::test]
async fn test_contact_details_are_redacted_before_persisting() {
    let executor = Arc::new(CountingExecutor::default());
    let calls = vec![request(
        "authenticated",
        "create_booking",
        json!({"venue_id": VENUE, "total": 250, "contact": "joao.pereira@example.pt"}),
    )];

    let (outcomes, entries) = persisted(AuditTrail::default(), calls, executor.clone()).await;

    assert!(outcomes[0].is_ok());
    // The database still receives the real value
    let bound = executor.queries.lock()[0].clone();
    assert!(bound.params.iter().any(|p| p.to_json() == json!("joao.pereira@example.pt")));

    let stored = serde_json::to_string(&entries[0]).unwrap();
    assert!(!stored.contains("joao.pereira"));
    assert_eq!(entries[0].event.payload["params"]["contact"], "[REDACTED]");
}

#[tokio::test]
async fn test_prepare_binds_without_auditing() {
    let trail = AuditTrail::default();
    let gateway = ToolGateway::new(
        manifests(),
        Arc::new(StaticCredentialResolver::new()),
        Arc::new(CountingExecutor::default()),
        trail.clone(),
    );

    let prepared = gateway
        .prepare(&request("anon", "list_venues", json!({"city": "Braga"})))
        .unwrap();
    assert_eq!(prepared.query.sql, "select id, name from venues where city = $1");
    assert_eq!(prepared.verb, "select");

    let log = Arc::new(InMemoryAuditLogRepository::new());
    let persister = AuditPersister::new(log.clone()).start(&trail);
    persister.shutdown().await;
    assert!(log.is_empty());
}
