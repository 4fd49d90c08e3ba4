//! PostgreSQL backend storing each collection as a table of JSONB documents.
//!
//! ```text
//! adaptive_collections(name, kind, table_name)      -- collection registry
//! adaptive_<collection>(seq, id, body, created, modified)
//! ```
//!
//! Equality lookups compare `COALESCE(body #> '{path}', 'null')` so that a
//! missing field reads as `null`, matching the in-memory backend. Declared
//! indices are expression indices over that same expression.

use super::{
    CollectionInfo, Document, EntityId, EntityStore, Expectation, Patch, Precondition, Query,
    StoreError, StoreResult, UpdateOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

const REGISTRY_TABLE: &str = "adaptive_collections";

/// [`EntityStore`] over a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tables: DashMap<String, String>,
}

impl PgStore {
    /// Connect and make sure the collection registry exists
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::unavailable(format!("connect failed: {e}")))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {REGISTRY_TABLE} (
                name TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                table_name TEXT NOT NULL
            )"
        ))
        .execute(&pool)
        .await?;

        info!("PostgreSQL entity store ready");
        Ok(Self {
            pool,
            tables: DashMap::new(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table_name(collection: &str) -> String {
        let sanitized: String = collection
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("adaptive_{sanitized}")
    }

    /// `'{a,b}'` literal for a dotted field path; only identifier characters
    /// are accepted because the path is spliced into SQL
    fn path_literal(collection: &str, field: &str) -> StoreResult<String> {
        let valid = !field.is_empty()
            && field.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !valid {
            return Err(StoreError::rejected(
                collection,
                "query",
                format!("invalid field path '{field}'"),
            ));
        }
        Ok(format!("'{{{}}}'", field.replace('.', ",")))
    }

    fn field_expr(collection: &str, field: &str) -> StoreResult<String> {
        Ok(format!(
            "COALESCE(body #> {}, 'null'::jsonb)",
            Self::path_literal(collection, field)?
        ))
    }

    async fn table(&self, collection: &str) -> StoreResult<String> {
        if let Some(table) = self.tables.get(collection) {
            return Ok(table.value().clone());
        }

        let row = sqlx::query(&format!(
            "SELECT table_name FROM {REGISTRY_TABLE} WHERE name = $1"
        ))
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let table: String = row.try_get("table_name")?;
                self.tables.insert(collection.to_string(), table.clone());
                Ok(table)
            }
            None => Err(StoreError::UnknownCollection(collection.to_string())),
        }
    }

    fn push_query_filter(
        builder: &mut QueryBuilder<'_, Postgres>,
        collection: &str,
        query: &Query,
    ) -> StoreResult<()> {
        for (field, value) in query.clauses() {
            builder.push(" AND ");
            builder.push(Self::field_expr(collection, field)?);
            builder.push(" = ");
            builder.push_bind(value.clone());
            builder.push("::jsonb");
        }
        Ok(())
    }

    fn push_precondition(
        builder: &mut QueryBuilder<'_, Postgres>,
        collection: &str,
        precondition: &Precondition,
    ) -> StoreResult<()> {
        for (field, expectation) in precondition.clauses() {
            let expr = Self::field_expr(collection, field)?;
            builder.push(" AND ");
            match expectation {
                Expectation::Equals(value) => {
                    builder.push(expr);
                    builder.push(" = ");
                    builder.push_bind(value.clone());
                    builder.push("::jsonb");
                }
                Expectation::OneOf(values) => {
                    builder.push_bind(Value::Array(values.clone()));
                    builder.push("::jsonb @> jsonb_build_array(");
                    builder.push(expr);
                    builder.push(")");
                }
            }
        }
        Ok(())
    }

    fn document_from_row(row: &PgRow) -> StoreResult<Document> {
        let id: Uuid = row.try_get("id")?;
        let body: Value = row.try_get("body")?;
        let created: DateTime<Utc> = row.try_get("created")?;
        let modified: DateTime<Utc> = row.try_get("modified")?;
        Ok(Document {
            id: EntityId::from_uuid(id),
            body,
            created: Some(created),
            modified: Some(modified),
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl EntityStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self))]
    async fn create_collection(&self, name: &str, kind: &str) -> StoreResult<()> {
        let table = Self::table_name(name);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                seq BIGSERIAL,
                id UUID PRIMARY KEY,
                body JSONB NOT NULL,
                created TIMESTAMPTZ NOT NULL DEFAULT now(),
                modified TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "INSERT INTO {REGISTRY_TABLE} (name, kind, table_name) VALUES ($1, $2, $3)
             ON CONFLICT (name) DO NOTHING"
        ))
        .bind(name)
        .bind(kind)
        .bind(&table)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    async fn list_collections(&self) -> StoreResult<Vec<CollectionInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT name, kind FROM {REGISTRY_TABLE} ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CollectionInfo {
                    name: row.try_get("name")?,
                    kind: row.try_get("kind")?,
                })
            })
            .collect()
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let table = Self::table_name(name);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM {REGISTRY_TABLE} WHERE name = $1"))
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        self.tables.remove(name);
        Ok(())
    }

    async fn create_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        let table = self.table(collection).await?;
        let expr = Self::field_expr(collection, field)?;
        let index = format!("{table}_{}_idx", field.replace('.', "_"));
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {table} (({expr}))"
        ))
        .execute(&self.pool)
        .await?;
        debug!(collection, field, "declared expression index");
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<Document>> {
        let table = self.table(collection).await?;
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(documents.len());

        for doc in documents {
            let result = sqlx::query(&format!(
                "INSERT INTO {table} (id, body) VALUES ($1, $2)
                 RETURNING id, body, created, modified"
            ))
            .bind(doc.id.as_uuid())
            .bind(&doc.body)
            .fetch_one(&mut *tx)
            .await;

            match result {
                Ok(row) => stored.push(Self::document_from_row(&row)?),
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        id: doc.id,
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn get(&self, collection: &str, id: EntityId) -> StoreResult<Option<Document>> {
        let table = self.table(collection).await?;
        let row = sqlx::query(&format!(
            "SELECT id, body, created, modified FROM {table} WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn ids(&self, collection: &str) -> StoreResult<Vec<EntityId>> {
        let table = self.table(collection).await?;
        let rows = sqlx::query(&format!("SELECT id FROM {table} ORDER BY seq"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(EntityId::from_uuid(row.try_get::<Uuid, _>("id")?)))
            .collect()
    }

    async fn load_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let table = self.table(collection).await?;
        let rows = sqlx::query(&format!(
            "SELECT id, body, created, modified FROM {table} ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::document_from_row).collect()
    }

    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let table = self.table(collection).await?;
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT id, body, created, modified FROM {table} WHERE TRUE"
        ));
        Self::push_query_filter(&mut builder, collection, query)?;
        builder.push(" ORDER BY seq");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::document_from_row).collect()
    }

    async fn count(&self, collection: &str, query: Option<&Query>) -> StoreResult<usize> {
        let table = self.table(collection).await?;
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {table} WHERE TRUE"));
        if let Some(query) = query {
            Self::push_query_filter(&mut builder, collection, query)?;
        }

        let count: i64 = builder.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    #[instrument(skip(self, patch, precondition))]
    async fn update(
        &self,
        collection: &str,
        id: EntityId,
        patch: &Patch,
        precondition: Option<&Precondition>,
    ) -> StoreResult<UpdateOutcome> {
        let table = self.table(collection).await?;
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {table} SET modified = now(), body = body || "
        ));
        builder.push_bind(Value::Object(patch.fields().clone()));
        builder.push("::jsonb WHERE id = ");
        builder.push_bind(id.as_uuid());
        if let Some(precondition) = precondition {
            Self::push_precondition(&mut builder, collection, precondition)?;
        }
        builder.push(" RETURNING id, body, created, modified");

        if let Some(row) = builder.build().fetch_optional(&self.pool).await? {
            return Ok(UpdateOutcome::Applied(Self::document_from_row(&row)?));
        }

        match self.get(collection, id).await? {
            Some(current) => Ok(UpdateOutcome::Conflict(current)),
            None => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id,
            }),
        }
    }

    async fn delete_all(&self, collection: &str) -> StoreResult<u64> {
        let table = self.table(collection).await?;
        let result = sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
