use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};

use crate::catalog::{Catalog, DeletedGraph, graph_not_found};
use crate::error::{LibError, Result};
use crate::models::{
    AnalysisKind, GraphId, GraphRecord, JobId, JobRecord, JobStatus, VertexId,
};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_graphapp_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct GraphRow {
    id: i64,
    data_ref: String,
    visual_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: i64,
    graph_id: i64,
    analysis: String,
    root: Option<i64>,
    status: String,
    result_ref: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<GraphRow> for GraphRecord {
    fn from(value: GraphRow) -> Self {
        Self {
            id: GraphId(value.id),
            data_ref: value.data_ref,
            visual_ref: value.visual_ref,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = LibError;

    fn try_from(value: JobRow) -> Result<Self> {
        let status = JobStatus::from_db_value(&value.status).ok_or_else(|| {
            LibError::storage(
                "Catalog holds an unreadable job",
                anyhow!("job {} has unknown status {}", value.id, value.status),
            )
        })?;
        let analysis = value.analysis.parse::<AnalysisKind>().map_err(|err| {
            LibError::storage(
                "Catalog holds an unreadable job",
                anyhow!("job {}: {}", value.id, err),
            )
        })?;
        Ok(Self {
            id: JobId(value.id),
            graph_id: GraphId(value.graph_id),
            analysis,
            root: value.root,
            status,
            result_ref: value.result_ref,
            error: value.error,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

fn hydrate_jobs(rows: Vec<JobRow>) -> Result<Vec<JobRecord>> {
    rows.into_iter().map(JobRecord::try_from).collect()
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::storage(public, anyhow!(err))
}

/// Postgres-backed catalog. Status transitions are single conditional
/// `UPDATE`s so concurrent writers cannot move a job backwards.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|err| db_err("Failed to connect to the catalog database", err))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs a status `UPDATE` binding `$1 = job id, $2 = value`; true when a row moved.
    async fn transition(
        &self,
        sql: &'static str,
        job_id: JobId,
        value: &str,
        public: &'static str,
    ) -> Result<bool> {
        let outcome = sqlx::query(sql)
            .bind(job_id.0)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|err| db_err(public, err))?;
        Ok(outcome.rows_affected() == 1)
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn create_graph(&self, data_ref: &str) -> Result<GraphRecord> {
        let row = sqlx::query_as::<_, GraphRow>(
            r#"
            INSERT INTO graphapp.graphs (data_ref)
            VALUES ($1)
            RETURNING id, data_ref, visual_ref, created_at, updated_at
            "#,
        )
        .bind(data_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| db_err("Failed to create graph", err))?;

        Ok(row.into())
    }

    async fn get_graph(&self, graph_id: GraphId) -> Result<Option<GraphRecord>> {
        let row = sqlx::query_as::<_, GraphRow>(
            r#"
            SELECT id, data_ref, visual_ref, created_at, updated_at
            FROM graphapp.graphs
            WHERE id = $1
            "#,
        )
        .bind(graph_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("Failed to query graph", err))?;

        Ok(row.map(GraphRecord::from))
    }

    async fn list_graphs(&self) -> Result<Vec<GraphRecord>> {
        let rows = sqlx::query_as::<_, GraphRow>(
            r#"
            SELECT id, data_ref, visual_ref, created_at, updated_at
            FROM graphapp.graphs
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to list graphs", err))?;

        Ok(rows.into_iter().map(GraphRecord::from).collect())
    }

    async fn replace_graph_data(
        &self,
        graph_id: GraphId,
        data_ref: &str,
    ) -> Result<Option<GraphRecord>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        let previous = sqlx::query_as::<_, GraphRow>(
            r#"
            SELECT id, data_ref, visual_ref, created_at, updated_at
            FROM graphapp.graphs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(graph_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to query graph", err))?;

        let Some(previous) = previous else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE graphapp.graphs
            SET data_ref = $2,
                visual_ref = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(graph_id.0)
        .bind(data_ref)
        .execute(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to replace graph data", err))?;

        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;

        Ok(Some(previous.into()))
    }

    async fn set_visual_ref(
        &self,
        graph_id: GraphId,
        data_ref: &str,
        visual_ref: &str,
    ) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE graphapp.graphs
            SET visual_ref = $3,
                updated_at = NOW()
            WHERE id = $1
              AND data_ref = $2
              AND visual_ref IS NULL
            "#,
        )
        .bind(graph_id.0)
        .bind(data_ref)
        .bind(visual_ref)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("Failed to record graph visual", err))?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn clear_visual_ref(&self, graph_id: GraphId, visual_ref: &str) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE graphapp.graphs
            SET visual_ref = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND visual_ref = $2
            "#,
        )
        .bind(graph_id.0)
        .bind(visual_ref)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("Failed to clear graph visual", err))?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn delete_graph(&self, graph_id: GraphId) -> Result<Option<DeletedGraph>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        // Row lock blocks concurrent job inserts until the cascade is done.
        let graph = sqlx::query_as::<_, GraphRow>(
            r#"
            SELECT id, data_ref, visual_ref, created_at, updated_at
            FROM graphapp.graphs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(graph_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to query graph", err))?;

        let Some(graph) = graph else {
            return Ok(None);
        };

        let jobs = sqlx::query_as::<_, JobRow>(
            r#"
            DELETE FROM graphapp.jobs
            WHERE graph_id = $1
            RETURNING id, graph_id, analysis, root, status, result_ref, error, created_at, updated_at
            "#,
        )
        .bind(graph_id.0)
        .fetch_all(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to delete graph jobs", err))?;

        sqlx::query(
            r#"
            DELETE FROM graphapp.graphs
            WHERE id = $1
            "#,
        )
        .bind(graph_id.0)
        .execute(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to delete graph", err))?;

        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;

        Ok(Some(DeletedGraph {
            graph: graph.into(),
            jobs: hydrate_jobs(jobs)?,
        }))
    }

    async fn create_job(
        &self,
        graph_id: GraphId,
        analysis: AnalysisKind,
        root: Option<VertexId>,
    ) -> Result<JobRecord> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO graphapp.jobs (graph_id, analysis, root, status)
            SELECT g.id, $2, $3, 'queued'
            FROM graphapp.graphs g
            WHERE g.id = $1
            RETURNING id, graph_id, analysis, root, status, result_ref, error, created_at, updated_at
            "#,
        )
        .bind(graph_id.0)
        .bind(analysis.as_str())
        .bind(root)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("Failed to create analysis job", err))?;

        match row {
            Some(row) => row.try_into(),
            None => Err(graph_not_found(graph_id)),
        }
    }

    async fn get_job(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, graph_id, analysis, root, status, result_ref, error, created_at, updated_at
            FROM graphapp.jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| db_err("Failed to query analysis job", err))?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn list_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, graph_id, analysis, root, status, result_ref, error, created_at, updated_at
            FROM graphapp.jobs
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to list analysis jobs", err))?;

        hydrate_jobs(rows)
    }

    async fn claim_job(&self, job_id: JobId) -> Result<bool> {
        let outcome = sqlx::query(
            r#"
            UPDATE graphapp.jobs
            SET status = 'running',
                updated_at = NOW()
            WHERE id = $1
              AND status = 'queued'
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await
        .map_err(|err| db_err("Failed to claim analysis job", err))?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn complete_job(&self, job_id: JobId, result_ref: &str) -> Result<bool> {
        self.transition(
            r#"
            UPDATE graphapp.jobs
            SET status = 'completed',
                result_ref = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status = 'running'
            "#,
            job_id,
            result_ref,
            "Failed to complete analysis job",
        )
        .await
    }

    async fn fail_job(&self, job_id: JobId, diagnostic: &str) -> Result<bool> {
        self.transition(
            r#"
            UPDATE graphapp.jobs
            SET status = 'error',
                error = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('queued', 'running')
            "#,
            job_id,
            diagnostic,
            "Failed to record analysis failure",
        )
        .await
    }

    async fn fail_stale_jobs(
        &self,
        status: JobStatus,
        updated_before: DateTime<Utc>,
        diagnostic: &str,
    ) -> Result<Vec<JobId>> {
        if status.is_terminal() {
            return Ok(Vec::new());
        }
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            UPDATE graphapp.jobs
            SET status = 'error',
                error = $2,
                updated_at = NOW()
            WHERE status = $3
              AND updated_at < $1
            RETURNING id
            "#,
        )
        .bind(updated_before)
        .bind(diagnostic)
        .bind(status.as_db_value())
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to expire stale analysis jobs", err))?;

        Ok(rows.into_iter().map(|(id,)| JobId(id)).collect())
    }

    async fn clear_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            DELETE FROM graphapp.jobs
            RETURNING id, graph_id, analysis, root, status, result_ref, error, created_at, updated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|err| db_err("Failed to clear analysis jobs", err))?;

        hydrate_jobs(rows)
    }
}
