use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::schema;
use super::{BuildStore, Lease, LeaseStore, Outbox};
use crate::error::StoreError;
use crate::model::{Build, Job, JobState, Project, ProjectKind};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store shared by every replica through one database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the shared database and makes sure the lease table exists.
    ///
    /// WAL mode keeps snapshot reads from blocking the lease writer of
    /// another replica; the busy timeout absorbs short write contention.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        configure(&conn)?;
        schema::ensure_lease_table(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::ensure_lease_table(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Appends a raw notification to the outbox, like `NOTIFY channel, payload`.
    pub fn notify(&self, channel: &str, payload: &str) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO notification(channel, payload) VALUES (?1, ?2)",
            params![channel, payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

pub(crate) fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

pub(crate) fn uuid_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

impl LeaseStore for SqliteStore {
    async fn try_claim_lease(
        &self,
        resource: &str,
        holder: &str,
        now_ms: i64,
        stale_before_ms: i64,
    ) -> Result<bool, StoreError> {
        // SET expressions see the pre-update row, so acquired_at_ms only
        // moves when the holder changes.
        let changed = self.conn.execute(
            r#"
            INSERT INTO relay_lease (service_name, holder_id, acquired_at_ms, renewed_at_ms)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(service_name) DO UPDATE SET
              acquired_at_ms = CASE
                WHEN relay_lease.holder_id = excluded.holder_id
                THEN relay_lease.acquired_at_ms
                ELSE excluded.acquired_at_ms
              END,
              holder_id = excluded.holder_id,
              renewed_at_ms = excluded.renewed_at_ms
            WHERE relay_lease.holder_id = excluded.holder_id
               OR relay_lease.renewed_at_ms < ?4
            "#,
            params![resource, holder, now_ms, stale_before_ms],
        )?;
        Ok(changed == 1)
    }

    async fn read_lease(&self, resource: &str) -> Result<Option<Lease>, StoreError> {
        let lease = self
            .conn
            .query_row(
                r#"
                SELECT service_name, holder_id, acquired_at_ms, renewed_at_ms
                FROM relay_lease
                WHERE service_name = ?1
                "#,
                params![resource],
                |row| {
                    Ok(Lease {
                        resource_name: row.get(0)?,
                        holder_id: row.get(1)?,
                        acquired_at_ms: row.get(2)?,
                        renewed_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(lease)
    }
}

impl Outbox for SqliteStore {
    async fn prune_notifications(&self, older_than_ms: i64) -> Result<usize, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM notification WHERE created_at_ms < ?1",
            params![older_than_ms],
        )?;
        Ok(removed)
    }
}

impl BuildStore for SqliteStore {
    async fn job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let job = self
            .conn
            .query_row(
                "SELECT id, build_id, project_id, name, state FROM job WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let state: String = row.get(4)?;
                    Ok(Job {
                        id: uuid_column(row, 0)?,
                        build_id: uuid_column(row, 1)?,
                        project_id: uuid_column(row, 2)?,
                        name: row.get(3)?,
                        state: JobState::from(state.as_str()),
                    })
                },
            )
            .optional()?;
        Ok(job)
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let project = self
            .conn
            .query_row(
                "SELECT id, name, type FROM project WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let kind: String = row.get(2)?;
                    Ok(Project {
                        id: uuid_column(row, 0)?,
                        name: row.get(1)?,
                        kind: ProjectKind::from(kind.as_str()),
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    async fn build(&self, id: Uuid) -> Result<Option<Build>, StoreError> {
        let build = self
            .conn
            .query_row(
                r#"
                SELECT id, project_id, build_number, restart_counter, commit_id
                FROM build
                WHERE id = ?1
                "#,
                params![id.to_string()],
                |row| {
                    Ok(Build {
                        id: uuid_column(row, 0)?,
                        project_id: uuid_column(row, 1)?,
                        build_number: row.get(2)?,
                        restart_counter: row.get(3)?,
                        commit_id: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(build)
    }

    async fn job_state_counts(&self, build_id: Uuid) -> Result<Vec<(JobState, u64)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, count(*) FROM job WHERE build_id = ?1 GROUP BY state")?;
        let rows = stmt.query_map(params![build_id.to_string()], |row| {
            let state: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((JobState::from(state.as_str()), count.max(0) as u64))
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        schema::bootstrap(store.connection()).unwrap();
        store
    }

    #[tokio::test]
    async fn first_claim_inserts_lease() {
        let store = store();
        assert!(store.try_claim_lease("relay", "a", 1_000, 0).await.unwrap());
        let lease = store.read_lease("relay").await.unwrap().unwrap();
        assert_eq!(lease.holder_id, "a");
        assert_eq!(lease.acquired_at_ms, 1_000);
        assert_eq!(lease.renewed_at_ms, 1_000);
    }

    #[tokio::test]
    async fn renewal_keeps_acquired_at() {
        let store = store();
        assert!(store.try_claim_lease("relay", "a", 1_000, 0).await.unwrap());
        assert!(store.try_claim_lease("relay", "a", 6_000, 1_000).await.unwrap());
        let lease = store.read_lease("relay").await.unwrap().unwrap();
        assert_eq!(lease.acquired_at_ms, 1_000);
        assert_eq!(lease.renewed_at_ms, 6_000);
    }

    #[tokio::test]
    async fn live_lease_rejects_other_holder() {
        let store = store();
        assert!(store.try_claim_lease("relay", "a", 10_000, 0).await.unwrap());
        assert!(!store.try_claim_lease("relay", "b", 12_000, 9_000).await.unwrap());
        assert_eq!(store.read_lease("relay").await.unwrap().unwrap().holder_id, "a");
    }

    #[tokio::test]
    async fn stale_lease_is_taken_over() {
        let store = store();
        assert!(store.try_claim_lease("relay", "a", 10_000, 0).await.unwrap());
        assert!(store.try_claim_lease("relay", "b", 40_000, 15_000).await.unwrap());
        let lease = store.read_lease("relay").await.unwrap().unwrap();
        assert_eq!(lease.holder_id, "b");
        assert_eq!(lease.acquired_at_ms, 40_000);
    }

    #[tokio::test]
    async fn leases_are_independent_per_resource() {
        let store = store();
        assert!(store.try_claim_lease("relay-a", "a", 10_000, 0).await.unwrap());
        assert!(store.try_claim_lease("relay-b", "b", 10_000, 0).await.unwrap());
    }

    #[tokio::test]
    async fn job_state_counts_group_by_state() {
        let store = store();
        let conn = store.connection();
        let project = Uuid::new_v4().to_string();
        let build = Uuid::new_v4();
        conn.execute(
            "INSERT INTO project(id, name, type) VALUES (?1, 'p', 'gerrit')",
            params![project],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO build(id, project_id, build_number, restart_counter, commit_id) VALUES (?1, ?2, 3, 1, 'abc')",
            params![build.to_string(), project],
        )
        .unwrap();
        for state in ["finished", "finished", "running"] {
            conn.execute(
                "INSERT INTO job(id, build_id, project_id, name, state) VALUES (?1, ?2, ?3, 'j', ?4)",
                params![Uuid::new_v4().to_string(), build.to_string(), project, state],
            )
            .unwrap();
        }
        let mut counts = store.job_state_counts(build).await.unwrap();
        counts.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        assert_eq!(
            counts,
            vec![(JobState::Finished, 2), (JobState::Running, 1)]
        );
    }

    #[tokio::test]
    async fn missing_rows_are_none() {
        let store = store();
        assert!(store.job(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.project(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.build(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_triggers_write_to_outbox_and_prune_clears_it() {
        let store = store();
        let conn = store.connection();
        conn.execute_batch(
            r#"
            INSERT INTO project(id, name, type) VALUES ('p', 'core', 'gerrit');
            INSERT INTO build(id, project_id, build_number, restart_counter, commit_id)
              VALUES ('b', 'p', 1, 1, 'abc');
            INSERT INTO job(id, build_id, project_id, name, state) VALUES ('j1', 'b', 'p', 'n', 'queued');
            UPDATE job SET state = 'running' WHERE id = 'j1';
            DELETE FROM job WHERE id = 'j1';
            "#,
        )
        .unwrap();
        let payloads: Vec<String> = conn
            .prepare("SELECT payload FROM notification WHERE channel = 'job_update' ORDER BY seq")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(payloads.len(), 3);
        assert!(payloads[0].contains("\"CREATE\""));
        assert!(payloads[1].contains("\"UPDATE\""));
        assert!(payloads[2].contains("\"DELETE\""));
        assert!(payloads.iter().all(|p| p.contains("\"j1\"")));

        assert_eq!(store.prune_notifications(0).await.unwrap(), 0);
        let removed = store.prune_notifications(i64::MAX).await.unwrap();
        assert_eq!(removed, 3);
    }
}
