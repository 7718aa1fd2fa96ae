// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Query Executor
//!
//! Runs gateway queries against PostgreSQL with the role's credential.
//!
//! - One lazily-connected pool per credential; a role never borrows another
//!   role's connection.
//! - Every call runs in its own transaction. The RLS context is applied with
//!   `set_config(key, value, true)` so it is scoped to that transaction.
//! - Parameters are only ever sent through positional binds.
//! - Row-producing statements are wrapped so that Postgres returns the rows
//!   as one JSON array.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgPool, PgPoolOptions, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Type};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::collaborators::{Credential, ExecutorError, QueryExecutor, QueryResult, RlsContext};
use crate::domain::manifest::ParamKind;
use crate::domain::parameters::ParamValue;
use crate::domain::template::BoundQuery;

const QUERY_CANCELED: &str = "57014";

pub struct PostgresQueryExecutor {
    pools: Mutex<HashMap<String, PgPool>>,
    max_connections: u32,
    statement_timeout_ms: Option<u64>,
}

impl PostgresQueryExecutor {
    pub fn new(statement_timeout_ms: Option<u64>) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            max_connections: 5,
            statement_timeout_ms,
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    fn pool_for(&self, credential: &Credential) -> Result<PgPool, ExecutorError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(credential.expose()) {
            return Ok(pool.clone());
        }
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_lazy(credential.expose())
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;
        pools.insert(credential.expose().to_string(), pool.clone());
        Ok(pool)
    }

    fn map_error(&self, err: sqlx::Error) -> ExecutorError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(QUERY_CANCELED) {
                return ExecutorError::Timeout(self.statement_timeout_ms.unwrap_or_default());
            }
        }
        ExecutorError::from(err)
    }

    async fn run(
        &self,
        pool: &PgPool,
        query: &BoundQuery,
        rls: &RlsContext,
    ) -> Result<QueryResult, sqlx::Error> {
        let mut tx = pool.begin().await?;

        if let Some(ms) = self.statement_timeout_ms {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(ms.to_string())
                .execute(&mut *tx)
                .await?;
        }
        for (key, value) in rls {
            sqlx::query("SELECT set_config($1, $2, true)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        let statement = query.sql.trim().trim_end_matches(';');
        let result = if returns_rows(statement) {
            let wrapped = format!(
                "WITH t AS ({statement}) SELECT coalesce(json_agg(t), '[]'::json) AS rows, count(*) AS n FROM t"
            );
            let row = bind_all(sqlx::query(&wrapped), &query.params)
                .fetch_one(&mut *tx)
                .await?;
            let rows: Value = row.try_get("rows")?;
            let n: i64 = row.try_get("n")?;
            QueryResult {
                rows: match rows {
                    Value::Array(items) => items,
                    other => vec![other],
                },
                rows_affected: n as u64,
            }
        } else {
            let done = bind_all(sqlx::query(statement), &query.params)
                .execute(&mut *tx)
                .await?;
            QueryResult {
                rows: Vec::new(),
                rows_affected: done.rows_affected(),
            }
        };

        tx.commit().await?;
        Ok(result)
    }
}

#[async_trait]
impl QueryExecutor for PostgresQueryExecutor {
    async fn execute(
        &self,
        credential: &Credential,
        query: &BoundQuery,
        rls: &RlsContext,
    ) -> Result<QueryResult, ExecutorError> {
        let pool = self.pool_for(credential)?;
        debug!(params = query.params.len(), rls_keys = rls.len(), "Executing bound query");
        self.run(&pool, query, rls).await.map_err(|e| self.map_error(e))
    }
}

/// Statements whose rows can be selected from a CTE.
fn returns_rows(statement: &str) -> bool {
    let lowered = statement.to_ascii_lowercase();
    let verb = lowered.split_whitespace().next().unwrap_or_default();
    matches!(verb, "select" | "with" | "values" | "table")
        || lowered.split_whitespace().any(|token| token == "returning")
}

/// Postgres type sent for a null of the given parameter kind. Matches the
/// type the non-null value of that kind binds as.
fn null_type_info(kind: ParamKind) -> PgTypeInfo {
    match kind {
        ParamKind::Uuid => <Uuid as Type<Postgres>>::type_info(),
        ParamKind::String => <String as Type<Postgres>>::type_info(),
        ParamKind::Number => <f64 as Type<Postgres>>::type_info(),
        ParamKind::Date => <NaiveDate as Type<Postgres>>::type_info(),
        ParamKind::Timestamp => <DateTime<Utc> as Type<Postgres>>::type_info(),
        ParamKind::Jsonb => <Json<Value> as Type<Postgres>>::type_info(),
    }
}

/// SQL NULL carrying the declared parameter type, so `uuid = $1` or an
/// insert into a `date` column does not see an untyped text parameter.
struct TypedNull(ParamKind);

impl Type<Postgres> for TypedNull {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}

impl<'q> Encode<'q, Postgres> for TypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(null_type_info(self.0))
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [ParamValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            ParamValue::Null(kind) => query.bind(TypedNull(*kind)),
            ParamValue::Uuid(v) => query.bind(*v),
            ParamValue::String(v) => query.bind(v.as_str()),
            ParamValue::Number(v) => query.bind(*v),
            ParamValue::Date(v) => query.bind(*v),
            ParamValue::Timestamp(v) => query.bind(*v),
            ParamValue::Jsonb(v) => query.bind(sqlx::types::Json(v)),
        };
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows_detection() {
        assert!(returns_rows("select * from bookings where id = $1"));
        assert!(returns_rows("WITH recent AS (select 1) select * from recent"));
        assert!(returns_rows("insert into bookings (id) values ($1) returning id"));
        assert!(!returns_rows("update bookings set status = $1 where id = $2"));
        assert!(!returns_rows("delete from bookings where id = $1"));
    }

    #[test]
    fn test_nulls_bind_with_their_declared_type() {
        assert_eq!(TypedNull(ParamKind::Uuid).produces(), Some(<Uuid as Type<Postgres>>::type_info()));
        assert_eq!(TypedNull(ParamKind::Number).produces(), Some(<f64 as Type<Postgres>>::type_info()));
        assert_eq!(TypedNull(ParamKind::Date).produces(), Some(<NaiveDate as Type<Postgres>>::type_info()));
        assert_eq!(
            TypedNull(ParamKind::Timestamp).produces(),
            Some(<DateTime<Utc> as Type<Postgres>>::type_info())
        );
        assert_eq!(
            TypedNull(ParamKind::Jsonb).produces(),
            Some(<Json<Value> as Type<Postgres>>::type_info())
        );

        let text = <String as Type<Postgres>>::type_info();
        for kind in [ParamKind::Uuid, ParamKind::Number, ParamKind::Date, ParamKind::Timestamp, ParamKind::Jsonb] {
            assert_ne!(null_type_info(kind), text, "{kind:?} null must not bind as text");
        }
        assert_eq!(null_type_info(ParamKind::String), text);
    }

    #[tokio::test]
    async fn test_pool_reused_per_credential() {
        let executor = PostgresQueryExecutor::new(Some(5_000));
        let cred = Credential::new("postgres://anon@localhost:5432/app");
        executor.pool_for(&cred).unwrap();
        executor.pool_for(&cred).unwrap();
        executor
            .pool_for(&Credential::new("postgres://svc@localhost:5432/app"))
            .unwrap();
        assert_eq!(executor.pools.lock().len(), 2);
    }
}
