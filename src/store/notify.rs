//! Notification fan-out that wakes the next stage.
//!
//! Delivery is fire-and-forget and at-least-once, with no ordering across
//! messages. Consumers must tolerate duplicates.

use crate::error::PipelineError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

/// Topic published when a task's page images are ready for extraction.
pub const PAGES_READY_TOPIC: &str = "pages-ready";

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PipelineError>;
}

/// A message as received from a [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub payload: String,
}

/// In-process sink backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PipelineError> {
        self.tx
            .send(Notification {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|_| PipelineError::Internal("notification receiver dropped".into()))
    }
}

/// Sink that only logs; for deployments where a downstream trigger watches
/// the store instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PipelineError> {
        info!(topic, "Notification: {}", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_in_publish_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.publish(PAGES_READY_TOPIC, "a").await.unwrap();
        sink.publish(PAGES_READY_TOPIC, "b").await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, "a");
        assert_eq!(rx.recv().await.unwrap().payload, "b");
    }

    #[tokio::test]
    async fn publishing_after_receiver_drop_errors() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        assert!(sink.publish(PAGES_READY_TOPIC, "x").await.is_err());
    }
}
