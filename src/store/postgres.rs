use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::schema;
use super::{BuildStore, Lease, LeaseStore, Outbox};
use crate::error::StoreError;
use crate::model::{Build, Job, JobState, Project, ProjectKind};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters for the shared Postgres database.
#[derive(Clone)]
pub struct PgConnectConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl PgConnectConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
            max_connections: 4,
        }
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .application_name("vote-relay")
    }
}

impl std::fmt::Debug for PgConnectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnectConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Postgres-backed store shared by replicas on any host.
///
/// Entity tables belong to the platform and are only read. The lease
/// table is created on connect if missing.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &PgConnectConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(config.connect_options())
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::query(schema::PG_LEASE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_state(row: &PgRow, column: &str) -> Result<JobState, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Ok(JobState::from(raw.as_str()))
}

impl LeaseStore for PgStore {
    async fn try_claim_lease(
        &self,
        resource: &str,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO relay_lease (service_name, holder_id, acquired_at_ms, renewed_at_ms)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (service_name) DO UPDATE SET
              acquired_at_ms = CASE
                WHEN relay_lease.holder_id = EXCLUDED.holder_id
                THEN relay_lease.acquired_at_ms
                ELSE EXCLUDED.acquired_at_ms
              END,
              holder_id = EXCLUDED.holder_id,
              renewed_at_ms = EXCLUDED.renewed_at_ms
            WHERE relay_lease.holder_id = EXCLUDED.holder_id
               OR relay_lease.renewed_at_ms < $4
            "#,
        )
        .bind(resource)
        .bind(holder)
        .bind(now_ms)
        .bind(stale_before_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn read_lease(&self, resource: &str) -> Result<Option<Lease>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT service_name, holder_id, acquired_at_ms, renewed_at_ms
            FROM relay_lease
            WHERE service_name = $1
            "#,
        )
        .bind(resource)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Lease {
            resource_name: row.try_get("service_name")?,
            holder_id: row.try_get("holder_id")?,
            acquired_at_ms: row.try_get("acquired_at_ms")?,
            renewed_at_ms: row.try_get("renewed_at_ms")?,
        }))
    }
}

impl Outbox for PgStore {
    /// `NOTIFY` payloads are not stored, so there is nothing to prune.
    async fn prune_notifications(&self, _older_than_ms: i64) -> Result<usize, StoreError> {
        Ok(0)
    }
}

impl BuildStore for PgStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            "SELECT id, build_id, project_id, name, state::text AS state FROM job WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Job {
            id: row.try_get("id")?,
            build_id: row.try_get("build_id")?,
            project_id: row.try_get("project_id")?,
            name: row.try_get("name")?,
            state: job_state(&row, "state")?,
        }))
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT id, name, type::text AS kind FROM project WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let kind: String = row.try_get("kind")?;
        Ok(Some(Project {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            kind: ProjectKind::from(kind.as_str()),
        }))
    }

    async fn build(&self, id: Uuid) -> Result<Option<Build>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id,
                   build_number::bigint AS build_number,
                   restart_counter::bigint AS restart_counter,
                   commit_id
            FROM build
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Build {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            build_number: row.try_get("build_number")?,
            restart_counter: row.try_get("restart_counter")?,
            commit_id: row.try_get("commit_id")?,
        }))
    }

    async fn job_state_counts(&self, build_id: Uuid) -> Result<Vec<(JobState, u64)>, StoreError> {
        let rows = sqlx::query(
            "SELECT state::text AS state, count(*) AS jobs FROM job WHERE build_id = $1 GROUP BY state",
        )
        .bind(build_id)
        .fetch_all(&self.pool)
        .await?;
        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let jobs: i64 = row.try_get("jobs")?;
            counts.push((job_state(row, "state")?, jobs.max(0) as u64));
        }
        Ok(counts)
    }
}
