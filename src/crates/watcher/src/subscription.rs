//! Topic subscription.
//!
//! Turns the pull-based mirror REST surface into a push stream the
//! dispatcher can `select!` on. Errors are delivered in-band so the
//! dispatcher can count them toward its reconnect threshold instead of the
//! stream silently dying.

use crate::error::WatcherResult;
use async_trait::async_trait;
use knowmarket_mirror::{MirrorClient, Reassembler, TopicMessage, DEFAULT_POLL_INTERVAL};
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    Message(TopicMessage),
    Error(String),
}

#[async_trait]
pub trait TopicSubscriber: Send + Sync {
    /// Opens a delivery channel for one topic, yielding logical messages
    /// with sequence numbers strictly greater than `after`. Dropping the
    /// receiver closes the subscription.
    async fn subscribe(
        &self,
        topic_id: &str,
        after: Option<u64>,
    ) -> WatcherResult<mpsc::Receiver<SubscriptionEvent>>;
}

/// Polls the mirror REST API and pushes whatever is new.
///
/// Partial chunk buckets belong to the subscriber, not to any single
/// subscription: the watcher resubscribes through the same instance after an
/// error streak, and a chunk set whose head arrived before the teardown must
/// still complete when its tail shows up on the new subscription.
pub struct MirrorSubscriber {
    client: MirrorClient,
    poll_interval: Duration,
    assembler: Arc<Mutex<Reassembler>>,
}

impl MirrorSubscriber {
    pub fn new(client: MirrorClient) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            assembler: Arc::new(Mutex::new(Reassembler::new())),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[async_trait]
impl TopicSubscriber for MirrorSubscriber {
    async fn subscribe(
        &self,
        topic_id: &str,
        after: Option<u64>,
    ) -> WatcherResult<mpsc::Receiver<SubscriptionEvent>> {
        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let topic_id = topic_id.to_string();
        let poll_interval = self.poll_interval;
        let assembler = Arc::clone(&self.assembler);

        tokio::spawn(async move {
            let mut watermark = after;

            loop {
                match client.topic_messages_page(&topic_id, watermark).await {
                    Ok(records) => {
                        let mut completed = Vec::new();
                        {
                            let mut assembler = assembler.lock().await;
                            for record in &records {
                                watermark =
                                    Some(watermark.unwrap_or(0).max(record.sequence_number));
                                if let Some(message) = assembler.push(record) {
                                    completed.push(message);
                                }
                            }
                        }
                        for message in completed {
                            if tx.send(SubscriptionEvent::Message(message)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        if tx
                            .send(SubscriptionEvent::Error(e.to_string()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }

                tokio::time::sleep(poll_interval).await;
                if tx.is_closed() {
                    debug!("subscription receiver dropped: topic={topic_id}");
                    return;
                }
            }
        });

        Ok(rx)
    }
}
