use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{
    error::{Result, TriageError},
    parser::StructuredMedicalRecord,
    storage::{EntryId, LogEntry, LogStatus, LogStore, QueryId, QueryStore},
};

/// Postgres-backed communication log.
pub struct PostgresLogStore {
    pool: PgPool,
}

impl PostgresLogStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to Postgres log store");
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agent_communication (
                id BIGSERIAL PRIMARY KEY,
                sender TEXT NOT NULL,
                receiver TEXT NOT NULL,
                input_msg TEXT NOT NULL,
                output_msg TEXT,
                status TEXT NOT NULL,
                session_id TEXT NOT NULL,
                parent_query_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn append(&self, entry: LogEntry) -> Result<EntryId> {
        let row = sqlx::query(
            r#"
            INSERT INTO agent_communication
                (sender, receiver, input_msg, output_msg, status, session_id, parent_query_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&entry.sender)
        .bind(&entry.receiver)
        .bind(&entry.input)
        .bind(&entry.output)
        .bind(entry.status.as_str())
        .bind(&entry.session_id)
        .bind(&entry.parent_query_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn update(&self, id: EntryId, output: &str, status: LogStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agent_communication
            SET output_msg = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(output)
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TriageError::Persistence(format!("log entry {id} not found")));
        }
        Ok(())
    }
}

/// Postgres-backed query records and their structured extractions.
pub struct PostgresQueryStore {
    pool: PgPool,
}

impl PostgresQueryStore {
    /// Share the log store's pool and create the tables if needed.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS health_query (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                input_text TEXT NOT NULL,
                response_text TEXT,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS structured_medical_data (
                id BIGSERIAL PRIMARY KEY,
                session_id TEXT NOT NULL,
                health_query_id BIGINT NOT NULL REFERENCES health_query (id),
                symptoms JSONB NOT NULL,
                diagnoses JSONB NOT NULL,
                treatments JSONB NOT NULL,
                precautions JSONB NOT NULL,
                severity TEXT NOT NULL,
                duration TEXT NOT NULL,
                parsed_content JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl QueryStore for PostgresQueryStore {
    async fn open(&self, session_id: &str, input_text: &str) -> Result<QueryId> {
        let row = sqlx::query(
            r#"
            INSERT INTO health_query (session_id, input_text, status)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(input_text)
        .bind(LogStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn close(&self, id: QueryId, response_text: &str, status: LogStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE health_query
            SET response_text = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(response_text)
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TriageError::Persistence(format!("query record {id} not found")));
        }
        Ok(())
    }

    async fn store_record(
        &self,
        id: QueryId,
        session_id: &str,
        record: &StructuredMedicalRecord,
        parsed_content: &Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO structured_medical_data
                (session_id, health_query_id, symptoms, diagnoses, treatments,
                 precautions, severity, duration, parsed_content)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session_id)
        .bind(id)
        .bind(sqlx::types::Json(&record.symptoms))
        .bind(sqlx::types::Json(&record.diagnoses))
        .bind(sqlx::types::Json(&record.treatments))
        .bind(sqlx::types::Json(&record.precautions))
        .bind(&record.severity)
        .bind(&record.duration)
        .bind(sqlx::types::Json(parsed_content))
        .execute(&self.pool)
        .await?;
        info!(query_id = id, "Stored structured medical record");
        Ok(())
    }
}
