use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use super::{decode_batch, ChangeFeed};
use crate::context::LogContext;
use crate::error::FeedError;
use crate::model::ChangeEvent;

/// Sending half of an in-process feed.
#[derive(Clone)]
pub struct MemoryNotifier {
    tx: UnboundedSender<(String, String)>,
}

impl MemoryNotifier {
    /// Returns false once the feed has been dropped.
    pub fn notify(&self, channel: &str, payload: impl Into<String>) -> bool {
        self.tx.send((channel.to_string(), payload.into())).is_ok()
    }
}

/// An in-process feed. Notifications for channels other than the
/// subscribed one are discarded.
pub struct MemoryChangeFeed {
    rx: UnboundedReceiver<(String, String)>,
    channel: Option<String>,
    log: LogContext,
}

impl MemoryChangeFeed {
    pub fn channel(log: &LogContext) -> (MemoryNotifier, MemoryChangeFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = MemoryChangeFeed {
            rx,
            channel: None,
            log: log.for_component("feed"),
        };
        (MemoryNotifier { tx }, feed)
    }

    fn accept(&self, channel: &str) -> bool {
        self.channel.as_deref() == Some(channel)
    }
}

impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&mut self, channel: &str) -> Result<(), FeedError> {
        self.channel = Some(channel.to_string());
        self.log = self.log.with("channel", channel);
        Ok(())
    }

    async fn wait_and_drain(&mut self, timeout: Duration) -> Result<Vec<ChangeEvent>, FeedError> {
        if self.channel.is_none() {
            return Err(FeedError::NotSubscribed);
        }

        let mut payloads = Vec::new();
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_elapsed) => return Ok(Vec::new()),
            Ok(None) => return Err(FeedError::Closed),
            Ok(Some((channel, payload))) => {
                if self.accept(&channel) {
                    payloads.push(payload);
                }
            }
        }

        loop {
            match self.rx.try_recv() {
                Ok((channel, payload)) => {
                    if self.accept(&channel) {
                        payloads.push(payload);
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        Ok(decode_batch(payloads, &self.log))
    }
}
