//! Table definitions.
//!
//! The lease table belongs to the relay and is created on open. The entity
//! tables belong to the surrounding platform. For SQLite, `bootstrap`
//! creates compatible ones plus a notification outbox for local runs and
//! tests; on Postgres the platform's triggers `NOTIFY job_update` directly.

use rusqlite::Connection;

use crate::error::StoreError;

/// Channel the job triggers publish on.
pub const JOB_UPDATE_CHANNEL: &str = "job_update";

pub(crate) const LEASE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relay_lease (
  service_name TEXT PRIMARY KEY,
  holder_id TEXT NOT NULL,
  acquired_at_ms INTEGER NOT NULL,
  renewed_at_ms INTEGER NOT NULL
);
"#;

/// Lease table for the Postgres backend. A single statement, so it can
/// run as one prepared query.
pub(crate) const PG_LEASE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS relay_lease (
  service_name TEXT PRIMARY KEY,
  holder_id TEXT NOT NULL,
  acquired_at_ms BIGINT NOT NULL,
  renewed_at_ms BIGINT NOT NULL
)
"#;

const ENTITY_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS project (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  type TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS build (
  id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL REFERENCES project(id),
  build_number INTEGER NOT NULL,
  restart_counter INTEGER NOT NULL DEFAULT 1,
  commit_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS job (
  id TEXT PRIMARY KEY,
  build_id TEXT NOT NULL REFERENCES build(id),
  project_id TEXT NOT NULL REFERENCES project(id),
  name TEXT NOT NULL,
  state TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS job_build_id ON job(build_id);

CREATE TABLE IF NOT EXISTS notification (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  channel TEXT NOT NULL,
  payload TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER) * 1000)
);

CREATE INDEX IF NOT EXISTS notification_channel_seq ON notification(channel, seq);

CREATE TRIGGER IF NOT EXISTS job_insert_notify AFTER INSERT ON job
BEGIN
  INSERT INTO notification(channel, payload)
  VALUES ('job_update', json_object('type', 'CREATE', 'job_id', NEW.id));
END;

CREATE TRIGGER IF NOT EXISTS job_update_notify AFTER UPDATE ON job
BEGIN
  INSERT INTO notification(channel, payload)
  VALUES ('job_update', json_object('type', 'UPDATE', 'job_id', NEW.id));
END;

CREATE TRIGGER IF NOT EXISTS job_delete_notify AFTER DELETE ON job
BEGIN
  INSERT INTO notification(channel, payload)
  VALUES ('job_update', json_object('type', 'DELETE', 'job_id', OLD.id));
END;
"#;

pub(crate) fn ensure_lease_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(LEASE_TABLE)?;
    Ok(())
}

/// Creates the entity tables, the outbox and its triggers if missing.
pub fn bootstrap(conn: &Connection) -> Result<(), StoreError> {
    ensure_lease_table(conn)?;
    conn.execute_batch(ENTITY_TABLES)?;
    Ok(())
}
