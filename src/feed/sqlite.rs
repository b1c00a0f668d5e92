use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection};
use tokio::time::Instant;

use super::{decode_batch, ChangeFeed};
use crate::context::LogContext;
use crate::error::{FeedError, StoreError};
use crate::model::ChangeEvent;
use crate::store::sqlite::configure;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Feed over the `notification` outbox table, for single-host local runs
/// and tests. It polls, so production deployments use `PgChangeFeed`.
///
/// Like `LISTEN`, a subscription only sees rows committed after it was
/// made. The cursor is held in memory, so a restarted process starts from
/// the newest row again.
pub struct SqliteChangeFeed {
    conn: Connection,
    channel: Option<String>,
    cursor: i64,
    poll_interval: Duration,
    log: LogContext,
}

impl SqliteChangeFeed {
    pub fn open(path: impl AsRef<Path>, log: &LogContext) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        configure(&conn)?;
        Ok(Self {
            conn,
            channel: None,
            cursor: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            log: log.for_component("feed"),
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn fetch_pending(&mut self, channel: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, payload FROM notification WHERE channel = ?1 AND seq > ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![channel, self.cursor], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut payloads = Vec::new();
        let mut cursor = self.cursor;
        for row in rows {
            let (seq, payload) = row?;
            cursor = cursor.max(seq);
            payloads.push(payload);
        }
        drop(stmt);
        self.cursor = cursor;
        Ok(payloads)
    }
}

impl ChangeFeed for SqliteChangeFeed {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FeedError> {
        let latest: i64 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM notification WHERE channel = ?1",
                params![channel],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        self.cursor = latest;
        self.channel = Some(channel.to_string());
        self.log = self.log.with("channel", channel);
        Ok(())
    }

    async fn wait_and_drain(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, FeedError> {
        let channel = self.channel.clone().ok_or(FeedError::NotSubscribed)?;
        let deadline = Instant::now() + timeout;
        loop {
            let payloads = self.fetch_pending(&channel)?;
            if !payloads.is_empty() {
                return Ok(decode_batch(payloads, &self.log));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
