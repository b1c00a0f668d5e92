//! Change-notification feeds.
//!
//! A feed is subscribed to one named channel and hands back every
//! notification that arrived since the last drain. Waiting on the feed is
//! the only place the relay suspends.
//!
//! `PgChangeFeed` is pushed notifications by Postgres `LISTEN`. The
//! in-process and SQLite outbox feeds serve tests and local runs.

pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::context::LogContext;
use crate::error::{DecodeError, FeedError};
use crate::model::{ChangeEvent, ChangeKind};

pub use memory::{MemoryChangeFeed, MemoryNotifier};
pub use postgres::PgChangeFeed;
pub use sqlite::SqliteChangeFeed;

#[allow(async_fn_in_trait)]
pub trait ChangeFeed {
    /// Starts receiving notifications on `channel`. Only notifications
    /// committed after the subscription are delivered.
    async fn subscribe(&mut self, channel: &str) -> Result<(), FeedError>;

    /// Suspends until at least one notification is buffered or `timeout`
    /// elapses, then returns everything buffered. Undecodable payloads are
    /// logged and left out.
    async fn wait_and_drain(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, FeedError>;
}

#[derive(Deserialize)]
struct JobNotification {
    #[serde(rename = "type")]
    kind: String,
    job_id: String,
}

/// Decodes a `{"type": ..., "job_id": ...}` payload.
pub fn decode_payload(raw: &str) -> Result<ChangeEvent, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let notification = JobNotification::deserialize(&value)?;
    let kind = notification
        .kind
        .parse::<ChangeKind>()
        .map_err(DecodeError::UnknownKind)?;
    let entity_id = Uuid::parse_str(&notification.job_id)
        .map_err(|_| DecodeError::InvalidId(notification.job_id.clone()))?;
    Ok(ChangeEvent {
        kind,
        entity_id,
        raw_payload: value,
    })
}

pub(crate) fn decode_batch<I>(payloads: I, log: &LogContext) -> Vec<ChangeEvent>
where
    I: IntoIterator<Item = String>,
{
    let mut events = Vec::new();
    for payload in payloads {
        match decode_payload(&payload) {
            Ok(event) => events.push(event),
            Err(DecodeError::UnknownKind(kind)) => {
                debug!("{}: ignoring notification of type {}", log, kind);
            }
            Err(err) => {
                warn!("{}: dropping notification {:?}: {}", log, payload, err);
            }
        }
    }
    events
}
