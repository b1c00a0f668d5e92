use std::time::Duration;

use thiserror::Error;

/// Missing or unusable configuration. Only raised before the supervisor
/// loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown event type: {0}")]
    UnknownKind(String),
    #[error("invalid entity id {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("feed is not subscribed to a channel")]
    NotSubscribed,
    #[error("feed closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to spawn remote command: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("remote command exited with {status}: {stderr}")]
    Remote { status: String, stderr: String },
    #[error("remote command timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
}

pub type Result<T> = std::result::Result<T, Error>;
