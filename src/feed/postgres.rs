use std::time::Duration;

use log::debug;
use sqlx::postgres::{PgListener, PgPool};

use super::{decode_batch, ChangeFeed};
use crate::context::LogContext;
use crate::error::{FeedError, StoreError};
use crate::model::ChangeEvent;

/// Feed over Postgres `LISTEN`.
///
/// The listener holds its own connection from the pool. If that
/// connection drops, the next wait reconnects and listens again;
/// notifications sent in between are lost, as with any `LISTEN` client.
pub struct PgChangeFeed {
    listener: PgListener,
    channel: Option<String>,
    log: LogContext,
}

impl PgChangeFeed {
    pub async fn connect(pool: &PgPool, log: &LogContext) -> Result<Self, StoreError> {
        let listener = PgListener::connect_with(pool).await?;
        Ok(Self {
            listener,
            channel: None,
            log: log.for_component("feed"),
        })
    }
}

impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FeedError> {
        self.listener
            .listen(channel)
            .await
            .map_err(StoreError::from)?;
        self.channel = Some(channel.to_string());
        self.log = self.log.with("channel", channel);
        debug!("{}: listening", self.log);
        Ok(())
    }

    async fn wait_and_drain(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, FeedError> {
        let Some(channel) = self.channel.as_deref() else {
            return Err(FeedError::NotSubscribed);
        };

        let first = match tokio::time::timeout(timeout, self.listener.recv()).await {
            Err(_elapsed) => return Ok(Vec::new()),
            Ok(result) => result.map_err(StoreError::from)?,
        };

        let mut payloads = Vec::new();
        if first.channel() == channel {
            payloads.push(first.payload().to_string());
        }
        while let Some(notification) = self.listener.next_buffered() {
            if notification.channel() == channel {
                payloads.push(notification.payload().to_string());
            }
        }
        Ok(decode_batch(payloads, &self.log))
    }
}
